use anyhow::Result;
use rusqlite::Connection;

use crate::pipeline::extract::concentration::ConcValue;
use crate::pipeline::DocumentReport;

const DB_PATH: &str = "data/sds.sqlite";

pub fn connect() -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(DB_PATH).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            id               INTEGER PRIMARY KEY,
            file             TEXT UNIQUE NOT NULL,
            pages            INTEGER NOT NULL DEFAULT 0,
            chars            INTEGER NOT NULL DEFAULT 0,
            error            TEXT,
            template         TEXT,
            router_score     REAL,
            doc_locked       BOOLEAN NOT NULL DEFAULT 0,
            template_created BOOLEAN NOT NULL DEFAULT 0,
            route_reason     TEXT,
            route_candidates TEXT,
            extract_score    INTEGER NOT NULL DEFAULT 0,
            product_name     TEXT,
            company          TEXT,
            address          TEXT,
            doc_no           TEXT,
            signal_word      TEXT,
            processed_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_documents_template ON documents(template);

        CREATE TABLE IF NOT EXISTS sections (
            id           INTEGER PRIMARY KEY,
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            key          TEXT NOT NULL,
            title        TEXT NOT NULL,
            start_off    INTEGER NOT NULL,
            end_off      INTEGER NOT NULL,
            body         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sections_document ON sections(document_id);

        CREATE TABLE IF NOT EXISTS composition (
            id           INTEGER PRIMARY KEY,
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            name         TEXT,
            alias        TEXT,
            cas          TEXT NOT NULL,
            conc_raw     TEXT,
            low          REAL,
            high         REAL,
            value        REAL,
            cmp_op       TEXT,
            unit         TEXT,
            rep          REAL,
            strategy     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_composition_document ON composition(document_id);
        CREATE INDEX IF NOT EXISTS idx_composition_cas ON composition(cas);

        CREATE TABLE IF NOT EXISTS physchem (
            id           INTEGER PRIMARY KEY,
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            key          TEXT NOT NULL,
            label        TEXT NOT NULL,
            value        TEXT NOT NULL,
            source       TEXT NOT NULL CHECK(source IN ('table','text'))
        );
        CREATE INDEX IF NOT EXISTS idx_physchem_document ON physchem(document_id);

        CREATE TABLE IF NOT EXISTS regulatory (
            id           INTEGER PRIMARY KEY,
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            raw          TEXT NOT NULL,
            norm         TEXT NOT NULL,
            threshold    TEXT,
            category     TEXT,
            score        INTEGER NOT NULL DEFAULT 0,
            source       TEXT NOT NULL CHECK(source IN ('regex','rule','fuzzy','none'))
        );
        CREATE INDEX IF NOT EXISTS idx_regulatory_document ON regulatory(document_id);

        CREATE TABLE IF NOT EXISTS hazard_codes (
            id           INTEGER PRIMARY KEY,
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            kind         TEXT NOT NULL CHECK(kind IN ('H','P','GHS')),
            code         TEXT NOT NULL,
            UNIQUE(document_id, kind, code)
        );

        CREATE TABLE IF NOT EXISTS classifications (
            id           INTEGER PRIMARY KEY,
            document_id  INTEGER NOT NULL REFERENCES documents(id),
            hazard_class TEXT NOT NULL,
            category     TEXT NOT NULL,
            raw          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_classifications_document ON classifications(document_id);
        ",
    )?;
    Ok(())
}

/// Persist a batch of reports, replacing any previous run of the same files.
pub fn save_reports(conn: &Connection, reports: &[DocumentReport]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for report in reports {
        save_one(&tx, report)?;
    }
    tx.commit()?;
    Ok(())
}

fn save_one(tx: &rusqlite::Transaction, report: &DocumentReport) -> Result<()> {
    let old_id = tx
        .query_row(
            "SELECT id FROM documents WHERE file = ?1",
            [&report.file],
            |r| r.get::<_, i64>(0),
        )
        .ok();
    if let Some(old_id) = old_id {
        for table in [
            "sections",
            "composition",
            "physchem",
            "regulatory",
            "hazard_codes",
            "classifications",
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE document_id = ?1"), [old_id])?;
        }
        tx.execute("DELETE FROM documents WHERE id = ?1", [old_id])?;
    }

    let route = report.route.as_ref();
    let ident = report.data.as_ref().map(|d| &d.ident);
    let signal = report
        .data
        .as_ref()
        .map(|d| d.hazards.signal_word.as_str())
        .unwrap_or("");

    let candidates_json = route
        .and_then(|r| serde_json::to_string(&r.candidates).ok())
        .unwrap_or_default();

    tx.execute(
        "INSERT INTO documents
         (file, pages, chars, error, template, router_score, doc_locked,
          template_created, route_reason, route_candidates, extract_score,
          product_name, company, address, doc_no, signal_word, processed_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        rusqlite::params![
            report.file,
            report.pages as i64,
            report.chars as i64,
            report.error,
            route.map(|r| r.selected.as_str()),
            route.map(|r| r.score),
            route.map(|r| r.locked).unwrap_or(false),
            route.map(|r| r.created).unwrap_or(false),
            route.map(|r| r.reason.as_str()),
            candidates_json,
            report.extract_score,
            ident.map(|i| i.product_name.as_str()),
            ident.map(|i| i.company.as_str()),
            ident.map(|i| i.address.as_str()),
            ident.map(|i| i.doc_no.as_str()),
            signal,
            report.processed_at.to_rfc3339(),
        ],
    )?;
    let doc_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO sections (document_id, key, title, start_off, end_off, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for key in &report.segmentation.order {
            if let Some(s) = report.segmentation.get(*key) {
                stmt.execute(rusqlite::params![
                    doc_id,
                    s.key.as_str(),
                    s.title,
                    s.start as i64,
                    s.end as i64,
                    s.body,
                ])?;
            }
        }
    }

    let Some(data) = &report.data else {
        return Ok(());
    };

    {
        let strategy = data.composition.strategy.unwrap_or("");
        let mut stmt = tx.prepare(
            "INSERT INTO composition
             (document_id, name, alias, cas, conc_raw, low, high, value, cmp_op, unit, rep, strategy)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        )?;
        for row in &data.composition.rows {
            let (low, high, value, cmp_op) = match row.conc.as_ref().map(|c| &c.value) {
                Some(ConcValue::Range { low, high }) => (Some(*low), Some(*high), None, None),
                Some(ConcValue::Comparator { op, value }) => {
                    (None, None, Some(*value), Some(op.clone()))
                }
                Some(ConcValue::Single { value }) => (None, None, Some(*value), None),
                None => (None, None, None, None),
            };
            stmt.execute(rusqlite::params![
                doc_id,
                row.name,
                row.alias,
                row.cas,
                row.conc_raw(),
                low,
                high,
                value,
                cmp_op,
                row.conc.as_ref().map(|c| c.unit.as_str()),
                row.representative(),
                strategy,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO physchem (document_id, key, label, value, source)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for row in &data.physchem {
            stmt.execute(rusqlite::params![
                doc_id,
                row.key,
                row.label,
                row.value,
                row.source.as_str(),
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO regulatory (document_id, raw, norm, threshold, category, score, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for item in &data.regulatory {
            stmt.execute(rusqlite::params![
                doc_id,
                item.raw,
                item.norm,
                item.threshold,
                item.category,
                item.score,
                item.source.as_str(),
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO hazard_codes (document_id, kind, code) VALUES (?1, ?2, ?3)",
        )?;
        for code in &data.hazards.h_codes {
            stmt.execute(rusqlite::params![doc_id, "H", code])?;
        }
        for code in &data.hazards.p_codes {
            stmt.execute(rusqlite::params![doc_id, "P", code])?;
        }
        for code in &data.hazards.pictograms {
            stmt.execute(rusqlite::params![doc_id, "GHS", code])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO classifications (document_id, hazard_class, category, raw)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for c in &data.hazards.classifications {
            stmt.execute(rusqlite::params![doc_id, c.hazard_class, c.category, c.raw])?;
        }
    }

    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub documents: usize,
    pub errors: usize,
    pub flagged: usize,
    pub composition_rows: usize,
    pub physchem_rows: usize,
    pub regulatory_rows: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let documents: usize = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
    let errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let flagged: usize = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE error IS NOT NULL OR extract_score < 100",
        [],
        |r| r.get(0),
    )?;
    let composition_rows: usize =
        conn.query_row("SELECT COUNT(*) FROM composition", [], |r| r.get(0))?;
    let physchem_rows: usize = conn.query_row("SELECT COUNT(*) FROM physchem", [], |r| r.get(0))?;
    let regulatory_rows: usize =
        conn.query_row("SELECT COUNT(*) FROM regulatory", [], |r| r.get(0))?;
    Ok(Stats {
        documents,
        errors,
        flagged,
        composition_rows,
        physchem_rows,
        regulatory_rows,
    })
}

// ── Overview ──

pub struct OverviewRow {
    pub file: String,
    pub template: String,
    pub router_score: f64,
    pub locked: bool,
    pub extract_score: i64,
    pub comp_rows: i64,
    pub reg_rows: i64,
    pub product: String,
    pub error: String,
}

pub fn fetch_overview(
    conn: &Connection,
    flagged_only: bool,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let where_clause = if flagged_only {
        " WHERE d.error IS NOT NULL OR d.extract_score < 100"
    } else {
        ""
    };
    let sql = format!(
        "SELECT d.file, COALESCE(d.template,''), COALESCE(d.router_score,0), d.doc_locked,
                d.extract_score,
                (SELECT COUNT(*) FROM composition c WHERE c.document_id = d.id),
                (SELECT COUNT(*) FROM regulatory r WHERE r.document_id = d.id),
                COALESCE(d.product_name,''), COALESCE(d.error,'')
         FROM documents d{where_clause}
         ORDER BY d.extract_score ASC, d.file
         LIMIT {limit}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(OverviewRow {
                file: row.get(0)?,
                template: row.get(1)?,
                router_score: row.get(2)?,
                locked: row.get(3)?,
                extract_score: row.get(4)?,
                comp_rows: row.get(5)?,
                reg_rows: row.get(6)?,
                product: row.get(7)?,
                error: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

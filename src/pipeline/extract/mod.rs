pub mod composition;
pub mod concentration;
pub mod hazards;
pub mod ident;
pub mod physchem;
pub mod regulatory;

use crate::template::Template;

use super::normalize::Document;
use super::sections::{SectionKey, Segmentation};
use super::tables::TableEngine;

use composition::{CompositionOutcome, Compositor};
use hazards::HazardData;
use ident::{IdentExtractor, Identification};
use physchem::{PhysChemRow, PhyschemExtractor};
use regulatory::{RegulatoryClassifier, RegulatoryItem};

/// Everything the field extractors recover from one document.
pub struct ExtractedData {
    pub ident: Identification,
    pub hazards: HazardData,
    pub composition: CompositionOutcome,
    pub physchem: Vec<PhysChemRow>,
    pub regulatory: Vec<RegulatoryItem>,
}

/// Run every field extractor with the routed template's rules.
pub fn extract_all(
    doc: &Document,
    seg: &Segmentation,
    template: &Template,
    engines: &[Box<dyn TableEngine>],
) -> ExtractedData {
    let ident = IdentExtractor::new(&template.identification, &template.meta)
        .extract(doc, seg.get(SectionKey::Identification));
    let hazards = hazards::extract_hazards(doc, seg.get(SectionKey::Hazards));
    let composition = Compositor::new(&template.composition).extract(
        doc,
        seg.get(SectionKey::Composition),
        engines,
    );
    let physchem = PhyschemExtractor::new(&template.physchem).extract(
        doc,
        seg.get(SectionKey::PhysicalChemical),
        engines,
    );
    let regulatory =
        RegulatoryClassifier::new(&template.regulatory).extract(doc, seg.get(SectionKey::Regulatory));

    ExtractedData {
        ident,
        hazards,
        composition,
        physchem,
        regulatory,
    }
}

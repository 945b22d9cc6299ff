// Vidgraph Engine — Two-Pass Concept Extraction
//
// Pass 1 (extractor): one LLM call per group yields candidate concepts.
// Pass 2 (consolidator): one LLM call per video merges duplicates across
// groups into the final persisted set.

pub mod consolidator;
pub mod extractor;

pub use consolidator::ConceptConsolidator;
pub use extractor::ConceptExtractor;

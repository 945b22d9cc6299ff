// Vidgraph Engine — transcript analysis components
//
// Turns time-stamped transcripts into an embedding-indexed segment set,
// temporally constrained semantic groups, a deduplicated two-pass concept
// set, and a typed relationship graph.

pub mod concepts;
pub mod graphstore;
pub mod grouping;
pub mod http;
pub mod llm;
pub mod pipeline;
pub mod relationships;
pub mod segmenter;
pub mod vectorstore;

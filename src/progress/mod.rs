//! Progress model: converts between whole-book fractions, section positions
//! and TOC / page-list entries.

mod section;
mod toc;

pub use section::{Counter, LocationCounter, Progress, SectionProgress, SectionWeight, TimeEstimate};
pub use toc::{TocItem, TocProgress, assign_ids, flatten};

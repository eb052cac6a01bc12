//! Component attributes: the ordered bag and the parser that fills it

mod bag;
mod parser;

pub use bag::{AttributeBag, SLOT_KEY};
pub use parser::{coerce_bound, parse_attributes, AttributeParser};

pub mod executor;
pub mod schema;

pub use executor::GuideExecutor;
pub use schema::{
    ActualValue, ExtractionGuide, GuideMiss, GuideOutcome, GuideReport, NOT_FOUND_SENTINEL,
};

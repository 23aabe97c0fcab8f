pub mod experiment;
pub mod results;
pub mod trial;

pub use experiment::*;
pub use results::*;
pub use trial::*;

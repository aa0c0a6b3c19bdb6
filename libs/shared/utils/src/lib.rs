pub mod extractor;
pub mod jwt;
pub mod logging;
pub mod test_utils;

#[doc(hidden)]
pub mod test_utils;

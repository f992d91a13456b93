//! Cross-module scenario tests exercising the fabric end to end.

#[cfg(test)]
mod scenario_tests;

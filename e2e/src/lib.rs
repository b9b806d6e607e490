//! End-to-end tests for the skywire crates against in-process servers.

#[cfg(test)]
mod tests;

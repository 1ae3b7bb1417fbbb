//! End-to-end tests of the dispatcher, its sinks and the `proactor` binary.

mod helpers;
mod test_concurrency;
mod test_retry;
mod test_routing;
mod test_shutdown;

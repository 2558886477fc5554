//! Circuit-level tests.



/// Storage components driven through transactions: associative store
/// round-trips and arbitration, banked store hazard policies.
pub mod storage;

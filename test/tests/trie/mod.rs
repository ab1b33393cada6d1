mod concurrency_tests;
mod proof_tests;
mod update_tests;

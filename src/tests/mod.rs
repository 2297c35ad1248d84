pub mod support;

mod api_tests;
mod sources_tests;
mod store_tests;

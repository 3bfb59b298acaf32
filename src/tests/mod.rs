mod support;

mod broadcaster_tests;
mod service_tests;

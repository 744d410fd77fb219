mod common;
mod round_robin_tests;

//! RaceBench Example Suite
//!
//! Races a few ways of building the same string, plus one async candidate and
//! one that always panics to show how errors are reported.
//!
//! Run with:
//!   cargo run --example string_building                      # Isolated worker process
//!   cargo run --example string_building -- --isolated=false  # Sandbox on a thread
//!   cargo run --example string_building -- list              # List candidates
//!   cargo run --example string_building -- --format json     # JSON report

use racebench::prelude::*;
use std::fmt::Write;
use std::hint::black_box;

const PARTS: usize = 32;

fn suite() -> Suite {
    let mut suite = Suite::new("string_building").setup(warm_allocator);

    suite
        .add(Candidate::sync("push_str", || {
            let mut s = String::new();
            for _ in 0..PARTS {
                s.push_str("ab");
            }
            black_box(s);
        }))
        .expect("valid title");

    suite
        .add(Candidate::sync("with_capacity", || {
            let mut s = String::with_capacity(PARTS * 2);
            for _ in 0..PARTS {
                s.push_str("ab");
            }
            black_box(s);
        }))
        .expect("valid title");

    suite
        .add(Candidate::sync("write!", || {
            let mut s = String::new();
            for _ in 0..PARTS {
                let _ = write!(s, "{}", "ab");
            }
            black_box(s);
        }))
        .expect("valid title");

    suite
        .add(Candidate::sync("repeat", || {
            black_box("ab".repeat(PARTS));
        }))
        .expect("valid title");

    suite
        .add(Candidate::future("async concat", || async {
            let mut s = String::new();
            for _ in 0..PARTS {
                s.push_str("ab");
                tokio::task::yield_now().await;
            }
            black_box(s);
        }))
        .expect("valid title");

    suite
        .add(Candidate::sync("out of bounds", || {
            let parts: Vec<&str> = vec!["ab"; PARTS];
            black_box(parts[black_box(PARTS)]);
        }))
        .expect("valid title");

    suite
}

fn warm_allocator() {
    black_box(String::with_capacity(PARTS * 2));
}

fn main() -> anyhow::Result<()> {
    racebench::run(suite)
}

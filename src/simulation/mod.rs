//! Synthetic universes for stress runs, benchmarks and demos.

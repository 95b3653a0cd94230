//! Rollout strategy: converts a parallelism spec and an optional canary
//! limit into ordered host batches.
//!
//! The spec grammar is: empty (all hosts in one batch), a positive integer
//! (batch size), or a percentage `p%` with `0 < p <= 100` (batch size is
//! `max(1, floor(host_count * p / 100))`). The limit is applied before
//! partitioning.

use crate::error::{HadesError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    batch_size: usize,
    limit: usize,
}

/// Syntax-only check used at load time, before host counts are known.
pub fn validate_spec(spec: &str) -> std::result::Result<(), String> {
    if spec.is_empty() {
        return Ok(());
    }
    if let Some(percent_str) = spec.strip_suffix('%') {
        let percent: f64 = percent_str
            .parse()
            .map_err(|_| format!("invalid percentage {spec:?}"))?;
        if percent <= 0.0 || percent > 100.0 {
            return Err(format!(
                "percentage must be between 0 and 100, got {percent}"
            ));
        }
        return Ok(());
    }
    let count: i64 = spec
        .parse()
        .map_err(|_| format!("invalid parallelism {spec:?} (expected a number or percentage)"))?;
    if count < 1 {
        return Err(format!("parallelism must be at least 1, got {count}"));
    }
    Ok(())
}

impl Strategy {
    /// Parse a parallelism spec against a concrete host count.
    pub fn parse(spec: &str, host_count: usize) -> Result<Self> {
        validate_spec(spec).map_err(HadesError::Config)?;

        let batch_size = if spec.is_empty() {
            host_count.max(1)
        } else if let Some(percent_str) = spec.strip_suffix('%') {
            let percent: f64 = percent_str.parse().expect("validated above");
            ((host_count as f64 * percent / 100.0).floor() as usize).max(1)
        } else {
            spec.parse::<usize>().expect("validated above")
        };

        Ok(Strategy {
            batch_size,
            limit: 0,
        })
    }

    /// Canary cap; zero disables the limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Partition hosts in order into batches. The limit, when set, trims
    /// the host list before partitioning.
    pub fn batches<T: Clone>(&self, hosts: &[T]) -> Vec<Vec<T>> {
        let selected = if self.limit > 0 && self.limit < hosts.len() {
            &hosts[..self.limit]
        } else {
            hosts
        };

        selected
            .chunks(self.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    fn spec_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            (1u32..=40).prop_map(|k| k.to_string()),
            (1u32..=100).prop_map(|p| format!("{p}%")),
        ]
    }

    proptest! {
        /// Any valid spec partitions the host list in order, covering
        /// `min(count, limit)` hosts with no batch above the batch size.
        #[test]
        fn batches_partition_hosts_in_order(
            spec in spec_strategy(),
            count in 1usize..32,
            limit in 0usize..40,
        ) {
            let hosts: Vec<usize> = (0..count).collect();
            let strategy = super::Strategy::parse(&spec, count)
                .unwrap()
                .with_limit(limit);
            prop_assert!(strategy.batch_size() >= 1);

            let batches = strategy.batches(&hosts);
            let expected = if limit > 0 && limit < count { limit } else { count };
            let flat: Vec<usize> = batches.iter().flatten().copied().collect();
            prop_assert_eq!(flat, (0..expected).collect::<Vec<_>>());
            for batch in &batches {
                prop_assert!(batch.len() <= strategy.batch_size());
            }
        }
    }
}

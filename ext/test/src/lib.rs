//! nodelabel-test: conformance fixtures and a sample node
//!
//! Provides a representative feature snapshot for tests and the YAML fixture
//! runner used by the conformance suite.
//!
//! # Example
//!
//! ```
//! use nodelabel_test::prelude::*;
//!
//! let features = node_snapshot();
//! let labels = Labeler::new(RuleSet::builtin()).labels(&features);
//! assert_eq!(labels.get("rdma.capable").map(String::as_str), Some("true"));
//! ```

use nodelabel::prelude::*;

pub mod fixture;

/// A worker node with an Intel NIC, a Mellanox RDMA adapter and KVM loaded.
///
/// Domains: `cpu`, `kernel`, `pci`, `usb` and `system`.
#[must_use]
pub fn node_snapshot() -> Features {
    Features::new()
        .with_domain(
            "cpu",
            DomainFeatures::new()
                .with_keys("cpuid", ["AVX", "AVX2", "FMA3", "SSE4"])
                .with_values("model", [("vendor_id", "GenuineIntel"), ("family", "6")]),
        )
        .with_domain(
            "kernel",
            DomainFeatures::new()
                .with_keys("loadedmodule", ["kvm", "kvm_intel", "ib_uverbs", "mlx5_core"])
                .with_values(
                    "config",
                    [("NO_HZ", "y"), ("PREEMPT", "n"), ("HZ", "1000")],
                )
                .with_values("version", [("major", "6"), ("minor", "8")]),
        )
        .with_domain(
            "pci",
            DomainFeatures::new().with_instances(
                "device",
                [
                    InstanceFeature::new([
                        ("class", "0200"),
                        ("vendor", "8086"),
                        ("device", "1521"),
                    ]),
                    InstanceFeature::new([
                        ("class", "0207"),
                        ("vendor", "15b3"),
                        ("device", "101b"),
                    ]),
                ],
            ),
        )
        .with_domain(
            "usb",
            DomainFeatures::new().with_instances(
                "device",
                [InstanceFeature::new([
                    ("class", "ff"),
                    ("vendor", "03e7"),
                    ("device", "2485"),
                    ("serial", "abc123"),
                ])],
            ),
        )
        .with_domain(
            "system",
            DomainFeatures::new().with_values("name", [("nodename", "worker-3")]),
        )
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::fixture::{Case, CaseResult, Fixture};
    pub use crate::node_snapshot;
    pub use nodelabel::prelude::*;
}

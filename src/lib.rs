//! LocalCam discovery core
//!
//! Evidence-based local-network discovery and classification of TP-Link
//! Tapo cameras. One async entry point sweeps the machine's IPv4 subnets,
//! gathers multi-modal evidence per neighbor, and returns ranked detections
//! plus structured diagnostics.
//!
//! ## Components
//!
//! 1. Interface Enumerator - gateway-backed IPv4 subnets
//! 2. Host Enumerator - full or sampled subnet expansion
//! 3. Probe Primitives - TCP / ICMP / UDP / HTTP banner
//! 4. Discovery Beacons - ONVIF WS-Discovery, Tapo/TP-Link UDP
//! 5. ARP Resolver - neighbor table MACs, TP-Link OUI lookup
//! 6. Probe Orchestrator - bounded fan-out with cancellation
//! 7. Classifier - weighted evidence scoring with negative overrides
//!
//! ## Example
//!
//! ```no_run
//! use localcam::{scan, ScanOptions};
//!
//! # async fn run() -> localcam::Result<()> {
//! let report = scan(ScanOptions::default()).await?;
//! for camera in &report.detections {
//!     println!("{}: {}", camera.ip, camera.reason);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod scan;

pub use error::{Error, Result};
pub use scan::{
    scan, scan_detections, CandidateDiagnostics, Detection, ScanDiagnostics, ScanOptions,
    ScanReport,
};

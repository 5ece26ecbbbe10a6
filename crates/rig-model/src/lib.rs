//! Payload and result contracts for the rig equilibrium solver.
//!
//! This crate defines the JSON-facing data model: the simulation payload a
//! caller submits, the validation that runs before any model is built, and
//! the result tree the solver hands back.

pub mod payload;
pub mod result;
pub mod validate;

pub use payload::{
    Geometry, JibSail, Load, LoadMode, MainSail, QProfile, Sails, SailMesh, SimulationPayload,
    SolverSettings, Stiffness, Controls,
};
pub use result::{
    CableCurves, Diagnostics, EquilibriumReport, IterationRecord, Outputs, PointXyz,
    SailGrids, SailSurfaces, SimulationResult, Spreaders, SpringForce, StepRecord, Tensions,
};
pub use validate::{validate, PayloadError};

//! Nonlinear static equilibrium engine for a small-dinghy sailing rig.
//!
//! The crate builds a finite-element model of the rig (mast bars and
//! bending triplets, tension-only cables, support springs, optional CST
//! membrane sails under follower pressure), then drives it to equilibrium
//! with a damped Newton solver or Dynamic Relaxation under a three-phase
//! load continuation: standing pretension, jib halyard, wind load.

pub mod assembly;
pub mod constants;
pub mod continuation;
pub mod elements;
pub mod error;
pub mod model;
pub mod newton;
pub mod relaxation;
pub mod results;
pub mod rig_builder;
pub mod sail_builder;
pub mod simulate;

pub use assembly::{assemble, AssembledState, AssemblyMeta, SystemAccumulator};
pub use continuation::{run_continuation, solve_one_state, ContinuationResult, SolverKind, StateOutcome};
pub use elements::{
    Bar, BendingTriplet, Cable, CableLaw, CablePath, CstTriangle, FollowerPressure, GroundSpring,
    LinkSpring, MembraneMaterial, TensionTie, WrinkleState,
};
pub use error::{Result, SolveError};
pub use model::{DofMap, Node, RigModel};
pub use newton::{solve_newton, NewtonConfig, NewtonOutcome};
pub use relaxation::{solve_relaxation, RelaxationConfig, RelaxationDiagnostics, RelaxationOutcome};
pub use results::{build_outputs, final_state};
pub use rig_builder::{build_rig, LoadScales, RigLayout};
pub use sail_builder::{add_sails, SailLayout};
pub use simulate::{simulate, simulate_with_options};

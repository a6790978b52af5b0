//! The `qpot_core` crate computes quasi-potential landscapes for planar
//! stochastic differential equations `dX = b(X) dt + ε dW`.
//!
//! Key components:
//! - **Grid**: uniform rectangular lattice with flat node indexing.
//! - **Equation Engine**: a bytecode VM turning drift expressions such as
//!   `"1.54*x*(1.0-(x/10.14)) - (y*x*x)/(1.0+x*x)"` into a `DriftField`.
//! - **Local**: ordered upwind marching from one stable equilibrium.
//! - **Global**: alignment of local surfaces at saddles and their pointwise minimum.
//! - **Decompose**: splitting the drift into `-∇U` and a remainder.
pub mod decompose;
pub mod equation_engine;
pub mod error;
pub mod field;
pub mod global;
pub mod grid;
pub mod local;
pub mod surface;
pub mod traits;

//! AQL query preparation and result handling
//!
//! This module provides:
//! - Placeholder scanning of query templates
//! - Typed parameter values for the closed parameter type set
//! - Strict argument validation and text coercion
//! - Safe binding through driver bind variables
//! - Normalization of flat and graph-shaped results

pub mod binder;
pub mod coercion;
pub mod graph;
pub mod normalizer;
pub mod placeholder;
pub mod validation;
pub mod value;

pub use binder::{BindError, BoundExecution, SafeBinder};
pub use coercion::{coerce_text_arguments, parse_text};
pub use graph::GraphView;
pub use normalizer::{NormalizeError, ResultNormalizer, ResultShape, detect_shape, is_edge};
pub use placeholder::{Placeholder, PlaceholderKind, PlaceholderScan};
pub use validation::{ParameterValidator, ValidatedArguments, ValidationError};
pub use value::{ParameterType, TypedValue, json_type_name};

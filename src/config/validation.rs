// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Validation for circuit descriptions.
//!
//! Checks run in order: unique ids, known ops, resolvable inputs and drivers,
//! then cycle detection, then shapes. Cycle detection needs a structurally
//! valid graph and shape inference an acyclic one, so each is skipped when an
//! earlier check failed. Every other problem is
//! accumulated so a description can be fixed in one pass.
//!
//! Only `inputs` form edges. A recurrence's `driver` is a feedback edge and
//! may close a loop; that is what recurrences are for.
//!
//! ```rust
//! use the_cogwheel::config::{validate_circuit_config, CircuitConfig, KernelConfig};
//! use the_cogwheel::errors::CircuitError;
//!
//! let config = CircuitConfig {
//!     kernels: vec![
//!         KernelConfig { id: "a".into(), op: "scale".into(), inputs: vec!["b".into()], ..Default::default() },
//!         KernelConfig { id: "b".into(), op: "scale".into(), inputs: vec!["a".into()], ..Default::default() },
//!     ],
//! };
//!
//! let errors = validate_circuit_config(&config).unwrap_err();
//! assert!(matches!(&errors[0], CircuitError::CyclicDependency { .. }));
//! ```

use std::collections::{HashMap, HashSet};

use crate::backends::cpu::{KernelOpFactory, OpCategory};
use crate::config::circuit_file::{parse_input, CircuitConfig};
use crate::errors::CircuitError;
use crate::observability::messages::validation::{
    CyclicDependencyDetected, DuplicateKernelId, IncompatibleShapes, MissingDriver, UnresolvedInput,
    ValidationCompleted, ValidationFailed, ValidationStarted,
};
use crate::observability::messages::StructuredLog;

/// Validates a circuit description, returning every problem found.
pub fn validate_circuit_config(config: &CircuitConfig) -> Result<(), Vec<CircuitError>> {
    ValidationStarted {
        kernel_count: config.kernels.len(),
    }
    .log();

    let mut errors = Vec::new();
    errors.extend(validate_unique_kernel_ids(config));
    errors.extend(validate_ops(config));
    errors.extend(validate_references(config));
    errors.extend(validate_drivers(config));

    if errors.is_empty() {
        if let Some(cycle) = find_cycle(config) {
            let names: Vec<&str> = cycle.iter().map(String::as_str).collect();
            CyclicDependencyDetected { cycle: &names }.log();
            errors.push(CircuitError::CyclicDependency { cycle });
        }
    }

    if errors.is_empty() {
        errors.extend(validate_shapes(config));
    }

    if errors.is_empty() {
        ValidationCompleted {
            kernel_count: config.kernels.len(),
            recurrence_count: config.kernels.iter().filter(|k| k.driver.is_some()).count(),
        }
        .log();
        Ok(())
    } else {
        ValidationFailed {
            error_count: errors.len(),
        }
        .log();
        Err(errors)
    }
}

fn validate_unique_kernel_ids(config: &CircuitConfig) -> Vec<CircuitError> {
    let mut seen = HashSet::new();
    config
        .kernels
        .iter()
        .filter(|kernel| !seen.insert(kernel.id.as_str()))
        .map(|kernel| {
            DuplicateKernelId { kernel: &kernel.id }.log();
            CircuitError::DuplicateKernel {
                kernel: kernel.id.clone(),
            }
        })
        .collect()
}

fn validate_ops(config: &CircuitConfig) -> Vec<CircuitError> {
    let mut errors = Vec::new();
    for kernel in &config.kernels {
        if !KernelOpFactory::is_implementation_available(&kernel.op) {
            errors.push(CircuitError::UnknownOp {
                kernel: kernel.id.clone(),
                op: kernel.op.clone(),
            });
        } else if KernelOpFactory::category_for(&kernel.op) != OpCategory::Ordinary && !kernel.inputs.is_empty() {
            errors.push(CircuitError::UnexpectedInputs {
                kernel: kernel.id.clone(),
                op: kernel.op.clone(),
            });
        }
    }
    errors
}

fn validate_references(config: &CircuitConfig) -> Vec<CircuitError> {
    let ids: HashSet<&str> = config.kernels.iter().map(|k| k.id.as_str()).collect();
    let mut errors = Vec::new();
    for kernel in &config.kernels {
        for input in &kernel.inputs {
            let resolved = parse_input(input).is_some_and(|(id, _)| ids.contains(id));
            if !resolved {
                UnresolvedInput {
                    kernel: &kernel.id,
                    missing_input: input,
                }
                .log();
                errors.push(CircuitError::UnresolvedDependency {
                    kernel: kernel.id.clone(),
                    missing: input.clone(),
                });
            }
        }
    }
    errors
}

fn validate_drivers(config: &CircuitConfig) -> Vec<CircuitError> {
    let ids: HashSet<&str> = config.kernels.iter().map(|k| k.id.as_str()).collect();
    let mut errors = Vec::new();
    for kernel in &config.kernels {
        let recurrent = KernelOpFactory::category_for(&kernel.op) == OpCategory::Recurrent;
        match (&kernel.driver, recurrent) {
            (None, true) => {
                MissingDriver {
                    kernel: &kernel.id,
                    driver: None,
                }
                .log();
                errors.push(CircuitError::MissingDriver {
                    kernel: kernel.id.clone(),
                });
            }
            (Some(driver), true) => {
                if !parse_input(driver).is_some_and(|(id, _)| ids.contains(id)) {
                    MissingDriver {
                        kernel: &kernel.id,
                        driver: Some(driver),
                    }
                    .log();
                    errors.push(CircuitError::UnresolvedDependency {
                        kernel: kernel.id.clone(),
                        missing: driver.clone(),
                    });
                }
            }
            (Some(_), false) => errors.push(CircuitError::NotRecurrent {
                kernel: kernel.id.clone(),
            }),
            (None, false) => {}
        }
    }
    errors
}

/// Ops are elementwise: inputs must match the output shape, and a driver
/// must match its recurrence.
fn validate_shapes(config: &CircuitConfig) -> Vec<CircuitError> {
    let shapes = config.shapes();
    let shape_of = |reference: &str| parse_input(reference).and_then(|(id, _)| shapes.get(id));
    let mut errors = Vec::new();
    for kernel in &config.kernels {
        let Some(expected) = shapes.get(kernel.id.as_str()) else {
            continue;
        };
        for input in &kernel.inputs {
            if let Some(actual) = shape_of(input).filter(|actual| *actual != expected) {
                IncompatibleShapes {
                    kernel: &kernel.id,
                    input,
                }
                .log();
                errors.push(CircuitError::ShapeMismatch {
                    kernel: kernel.id.clone(),
                    input: input.clone(),
                    expected: format!("{expected:?}"),
                    actual: format!("{actual:?}"),
                });
            }
        }
        if let Some(driver) = &kernel.driver {
            if let Some(actual) = shape_of(driver).filter(|actual| *actual != expected) {
                IncompatibleShapes {
                    kernel: &kernel.id,
                    input: driver,
                }
                .log();
                errors.push(CircuitError::RecurrenceTypeMismatch {
                    recurrent: kernel.id.clone(),
                    expected: format!("{expected:?}"),
                    actual: format!("{actual:?}"),
                });
            }
        }
    }
    errors
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

/// DFS over input edges. Returns the first cycle found, closed on itself.
fn find_cycle(config: &CircuitConfig) -> Option<Vec<String>> {
    let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
    for kernel in &config.kernels {
        consumers.entry(kernel.id.as_str()).or_default();
        for input in &kernel.inputs {
            if let Some((id, _)) = parse_input(input) {
                consumers.entry(id).or_default().push(kernel.id.as_str());
            }
        }
    }

    fn visit<'a>(
        id: &'a str,
        consumers: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(id, Mark::InProgress);
        path.push(id);
        for next in consumers.get(id).into_iter().flatten() {
            match marks.get(next) {
                Some(Mark::InProgress) => {
                    let start = path.iter().position(|p| p == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = visit(*next, consumers, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for kernel in &config.kernels {
        if !marks.contains_key(kernel.id.as_str()) {
            let mut path = Vec::new();
            if let Some(cycle) = visit(kernel.id.as_str(), &consumers, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::circuit_file::KernelConfig;

    fn kernel(id: &str, op: &str, inputs: &[&str]) -> KernelConfig {
        KernelConfig {
            id: id.to_string(),
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            ..KernelConfig::default()
        }
    }

    fn recurrence(id: &str, driver: Option<&str>) -> KernelConfig {
        KernelConfig {
            driver: driver.map(str::to_string),
            ..kernel(id, "recurrence", &[])
        }
    }

    fn circuit(kernels: Vec<KernelConfig>) -> CircuitConfig {
        CircuitConfig { kernels }
    }

    #[test]
    fn test_valid_chain() {
        let config = circuit(vec![
            kernel("a", "constant", &[]),
            kernel("b", "scale", &["a"]),
            kernel("c", "add", &["a", "b"]),
        ]);
        assert!(validate_circuit_config(&config).is_ok());
    }

    #[test]
    fn test_recurrence_loop_is_not_a_cycle() {
        let config = circuit(vec![
            recurrence("count", Some("next")),
            kernel("next", "add_scalar", &["count"]),
        ]);
        assert!(validate_circuit_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_ids() {
        let config = circuit(vec![kernel("a", "constant", &[]), kernel("a", "constant", &[])]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![CircuitError::DuplicateKernel {
                kernel: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_unresolved_input_and_malformed_output_index() {
        let config = circuit(vec![
            kernel("a", "constant", &[]),
            kernel("b", "scale", &["missing"]),
            kernel("c", "scale", &["a:one"]),
        ]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, CircuitError::UnresolvedDependency { .. })));
    }

    #[test]
    fn test_driver_problems() {
        let config = circuit(vec![
            recurrence("lonely", None),
            recurrence("lost", Some("nowhere")),
            KernelConfig {
                driver: Some("lonely".to_string()),
                ..kernel("plain", "scale", &["lonely"])
            },
        ]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert!(errors.contains(&CircuitError::MissingDriver {
            kernel: "lonely".to_string()
        }));
        assert!(errors.contains(&CircuitError::UnresolvedDependency {
            kernel: "lost".to_string(),
            missing: "nowhere".to_string()
        }));
        assert!(errors.contains(&CircuitError::NotRecurrent {
            kernel: "plain".to_string()
        }));
    }

    #[test]
    fn test_unknown_op_and_inputs_on_source() {
        let config = circuit(vec![
            kernel("a", "fft", &[]),
            kernel("b", "constant", &["a"]),
        ]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert!(errors.contains(&CircuitError::UnknownOp {
            kernel: "a".to_string(),
            op: "fft".to_string()
        }));
        assert!(errors.contains(&CircuitError::UnexpectedInputs {
            kernel: "b".to_string(),
            op: "constant".to_string()
        }));
    }

    #[test]
    fn test_cycle_path_is_reported() {
        let config = circuit(vec![
            kernel("a", "constant", &[]),
            kernel("b", "add", &["a", "d"]),
            kernel("c", "scale", &["b"]),
            kernel("d", "scale", &["c"]),
        ]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![CircuitError::CyclicDependency {
                cycle: vec!["b".to_string(), "c".to_string(), "d".to_string(), "b".to_string()]
            }]
        );
    }

    #[test]
    fn test_self_dependency() {
        let config = circuit(vec![kernel("a", "scale", &["a"])]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![CircuitError::CyclicDependency {
                cycle: vec!["a".to_string(), "a".to_string()]
            }]
        );
    }

    #[test]
    fn test_shape_mismatches() {
        let shaped = |id: &str, op: &str, inputs: &[&str], shape: &[usize]| KernelConfig {
            shape: Some(shape.to_vec()),
            ..kernel(id, op, inputs)
        };
        let config = circuit(vec![
            shaped("wide", "constant", &[], &[4]),
            shaped("narrow", "constant", &[], &[2]),
            kernel("follows", "scale", &["wide"]),
            kernel("mixed", "add", &["wide", "narrow"]),
            KernelConfig {
                driver: Some("follows".to_string()),
                ..recurrence("state", None)
            },
        ]);
        let errors = validate_circuit_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                CircuitError::ShapeMismatch {
                    kernel: "mixed".to_string(),
                    input: "narrow".to_string(),
                    expected: "[4]".to_string(),
                    actual: "[2]".to_string(),
                },
                CircuitError::RecurrenceTypeMismatch {
                    recurrent: "state".to_string(),
                    expected: "[]".to_string(),
                    actual: "[4]".to_string(),
                },
            ]
        );
    }
}

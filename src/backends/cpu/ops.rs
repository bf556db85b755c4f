// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Mutex;

use crate::errors::KernelError;
use crate::memory::{FieldView, FieldViewMut};
use crate::traits::KernelOp;

fn single_output<'o, 'a>(outputs: &'o mut [FieldViewMut<'a>]) -> Result<&'o mut FieldViewMut<'a>, KernelError> {
    let actual = outputs.len();
    match outputs {
        [output] => Ok(output),
        _ => Err(KernelError::OutputCount { expected: 1, actual }),
    }
}

fn single_input<'i, 'a>(inputs: &'i [FieldView<'a>]) -> Result<&'i FieldView<'a>, KernelError> {
    let actual = inputs.len();
    match inputs {
        [input] => Ok(input),
        _ => Err(KernelError::InputCount { expected: 1, actual }),
    }
}

fn check_words(expected: usize, actual: usize) -> Result<(), KernelError> {
    if expected != actual {
        return Err(KernelError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

/// Fills its output with a fixed value.
pub struct ConstantOp {
    value: f32,
}

impl ConstantOp {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl KernelOp for ConstantOp {
    fn compute(&self, _inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        single_output(outputs)?.fill(self.value);
        Ok(())
    }

    fn reset(&self, outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        single_output(outputs)?.fill(self.value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "constant"
    }
}

/// `output = input + value`
pub struct AddScalarOp {
    value: f32,
}

impl AddScalarOp {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl KernelOp for AddScalarOp {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        let input = single_input(inputs)?;
        let output = single_output(outputs)?;
        check_words(output.data.len(), input.data.len())?;
        for (out, x) in output.data.iter_mut().zip(input.data) {
            *out = x + self.value;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "add_scalar"
    }
}

/// Same as [`AddScalarOp`] but pinned to the node's CPU worker.
pub struct CpuAddScalarOp {
    inner: AddScalarOp,
}

impl CpuAddScalarOp {
    pub fn new(value: f32) -> Self {
        Self {
            inner: AddScalarOp::new(value),
        }
    }
}

impl KernelOp for CpuAddScalarOp {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        self.inner.compute(inputs, outputs)
    }

    fn requires_cpu(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "cpu_add_scalar"
    }
}

/// Elementwise sum of all inputs.
pub struct AddOp;

impl KernelOp for AddOp {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        let output = single_output(outputs)?;
        if inputs.is_empty() {
            return Err(KernelError::InputCount {
                expected: 1,
                actual: 0,
            });
        }
        output.fill(0.0);
        for input in inputs {
            check_words(output.data.len(), input.data.len())?;
            for (out, x) in output.data.iter_mut().zip(input.data) {
                *out += x;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "add"
    }
}

/// `output = input * factor`
pub struct ScaleOp {
    factor: f32,
}

impl ScaleOp {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl KernelOp for ScaleOp {
    fn compute(&self, inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        let input = single_input(inputs)?;
        let output = single_output(outputs)?;
        check_words(output.data.len(), input.data.len())?;
        for (out, x) in output.data.iter_mut().zip(input.data) {
            *out = x * self.factor;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scale"
    }
}

/// State holder for a recurrent kernel. Nothing to compute: the value
/// arrives through the flip-flop.
pub struct RecurrenceOp {
    initial: f32,
}

impl RecurrenceOp {
    pub fn new(initial: f32) -> Self {
        Self { initial }
    }
}

impl KernelOp for RecurrenceOp {
    fn compute(&self, _inputs: &[FieldView<'_>], _outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        Ok(())
    }

    fn reset(&self, outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        single_output(outputs)?.fill(self.initial);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recurrence"
    }
}

/// Sensor producing `start`, `start + increment`, ... one value per call.
pub struct RampSensorOp {
    start: f32,
    increment: f32,
    next: Mutex<f32>,
}

impl RampSensorOp {
    pub fn new(start: f32, increment: f32) -> Self {
        Self {
            start,
            increment,
            next: Mutex::new(start),
        }
    }

    fn advance(&self) -> f32 {
        let mut next = self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = *next;
        *next += self.increment;
        value
    }
}

impl KernelOp for RampSensorOp {
    fn compute(&self, _inputs: &[FieldView<'_>], outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        let value = self.advance();
        single_output(outputs)?.fill(value);
        Ok(())
    }

    fn reset(&self, outputs: &mut [FieldViewMut<'_>]) -> Result<(), KernelError> {
        *self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = self.start;
        single_output(outputs)?.fill(self.start);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ramp_sensor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BufferKind, FieldMemory, FieldType};

    fn memory(values: &[f32]) -> FieldMemory {
        FieldMemory::from_data(FieldType::scalar_field(&[values.len()]), values.to_vec()).unwrap()
    }

    #[test]
    fn test_add_scalar() {
        let input = memory(&[1.0, 2.0]);
        let mut output = FieldMemory::new(FieldType::scalar_field(&[2]), BufferKind::Direct);
        AddScalarOp::new(0.5)
            .compute(&[input.view()], &mut [output.view_mut()])
            .unwrap();
        assert_eq!(output.read(), &[1.5, 2.5]);
    }

    #[test]
    fn test_add_sums_all_inputs() {
        let a = memory(&[1.0, 2.0]);
        let b = memory(&[10.0, 20.0]);
        let mut output = FieldMemory::new(FieldType::scalar_field(&[2]), BufferKind::Direct);
        AddOp.compute(&[a.view(), b.view()], &mut [output.view_mut()]).unwrap();
        assert_eq!(output.read(), &[11.0, 22.0]);
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let input = memory(&[1.0, 2.0, 3.0]);
        let mut output = FieldMemory::new(FieldType::scalar_field(&[2]), BufferKind::Direct);
        let err = ScaleOp::new(2.0)
            .compute(&[input.view()], &mut [output.view_mut()])
            .unwrap_err();
        assert_eq!(err, KernelError::ShapeMismatch { expected: 2, actual: 3 });
    }

    #[test]
    fn test_ramp_sensor_restarts_on_reset() {
        let op = RampSensorOp::new(1.0, 2.0);
        let mut output = FieldMemory::new(FieldType::scalar(), BufferKind::Direct);
        op.compute(&[], &mut [output.view_mut()]).unwrap();
        op.compute(&[], &mut [output.view_mut()]).unwrap();
        assert_eq!(output.read(), &[3.0]);

        op.reset(&mut [output.view_mut()]).unwrap();
        assert_eq!(output.read(), &[1.0]);
        op.compute(&[], &mut [output.view_mut()]).unwrap();
        assert_eq!(output.read(), &[1.0]);
    }

    #[test]
    fn test_recurrence_reset_loads_initial_value() {
        let mut output = FieldMemory::new(FieldType::scalar_field(&[2]), BufferKind::Direct);
        RecurrenceOp::new(4.0).reset(&mut [output.view_mut()]).unwrap();
        assert_eq!(output.read(), &[4.0, 4.0]);
    }
}

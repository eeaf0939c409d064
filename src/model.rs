//! Model parameters as seen by the communication strategies.

use std::collections::BTreeMap;

use crate::array::HostArray;
use crate::error::{Error, Result};

/// A named parameter and its gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub data: HostArray,
    pub grad: Option<HostArray>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data: HostArray) -> Self {
        Self {
            name: name.into(),
            data,
            grad: None,
        }
    }

    pub fn with_grad(mut self, grad: HostArray) -> Self {
        self.grad = Some(grad);
        self
    }
}

/// Anything that exposes its parameters for synchronization.
///
/// `params_mut` must return parameters in the same order on every process,
/// since strategies pack them into one flat buffer.
pub trait Model {
    fn params_mut(&mut self) -> Vec<&mut Parameter>;
}

impl Model for Vec<Parameter> {
    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.iter_mut().collect()
    }
}

/// Parameters keyed by name; iteration order is the name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: BTreeMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, replacing one with the same name.
    pub fn insert(&mut self, param: Parameter) -> Option<Parameter> {
        self.params.insert(param.name.clone(), param)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }
}

impl Model for ParameterSet {
    fn params_mut(&mut self) -> Vec<&mut Parameter> {
        self.params.values_mut().collect()
    }
}

/// Which array of a parameter to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Data,
    Grad,
}

impl Field {
    fn get(self, param: &Parameter) -> Option<&HostArray> {
        match self {
            Field::Data => Some(&param.data),
            Field::Grad => param.grad.as_ref(),
        }
    }

    fn get_mut(self, param: &mut Parameter) -> Option<&mut HostArray> {
        match self {
            Field::Data => Some(&mut param.data),
            Field::Grad => param.grad.as_mut(),
        }
    }
}

/// Concatenate `field` of every parameter that has it, in order.
pub(crate) fn pack(params: &[&mut Parameter], field: Field) -> Vec<f32> {
    params
        .iter()
        .filter_map(|p| field.get(p))
        .flat_map(|a| a.iter().copied())
        .collect()
}

/// Scatter a packed buffer back into `field` of every parameter that has it.
pub(crate) fn unpack(params: &mut [&mut Parameter], field: Field, buf: &[f32]) -> Result<()> {
    let mut offset = 0;
    for param in params.iter_mut() {
        let Some(n) = field.get(param).map(|a| a.len()) else {
            continue;
        };
        let src = buf.get(offset..offset + n).ok_or_else(|| {
            Error::contract(format!(
                "packed buffer of {} elements too short for parameter '{}'",
                buf.len(),
                param.name
            ))
        })?;
        if let Some(array) = field.get_mut(param) {
            array.iter_mut().zip(src).for_each(|(d, &s)| *d = s);
        }
        offset += n;
    }
    if offset != buf.len() {
        return Err(Error::contract(format!(
            "packed buffer has {} elements, parameters consumed {offset}",
            buf.len()
        )));
    }
    Ok(())
}

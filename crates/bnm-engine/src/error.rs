// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulation errors (model errors attributed to an instance)

use bnm_neural::{InstanceId, ModelError};

/// Error returned by one simulation instance
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("{instance}: {source}")]
    Model {
        instance: InstanceId,
        #[source]
        source: ModelError,
    },

    #[error("{instance}: cancelled at step {step}")]
    Cancelled { instance: InstanceId, step: u64 },
}

impl SimulationError {
    pub fn model(instance: InstanceId, source: ModelError) -> Self {
        SimulationError::Model { instance, source }
    }

    pub fn instance(&self) -> InstanceId {
        match self {
            SimulationError::Model { instance, .. } | SimulationError::Cancelled { instance, .. } => {
                *instance
            }
        }
    }

    /// Underlying model error, if any
    pub fn model_error(&self) -> Option<&ModelError> {
        match self {
            SimulationError::Model { source, .. } => Some(source),
            SimulationError::Cancelled { .. } => None,
        }
    }
}

/// Attach an instance id to a model-level result
pub(crate) trait InstanceContext<T> {
    fn for_instance(self, instance: InstanceId) -> Result<T, SimulationError>;
}

impl<T> InstanceContext<T> for bnm_neural::Result<T> {
    fn for_instance(self, instance: InstanceId) -> Result<T, SimulationError> {
        self.map_err(|source| SimulationError::model(instance, source))
    }
}

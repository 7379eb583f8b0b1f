use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasError {
    #[error("gas pool depleted: requested {requested}, remaining {remaining}")]
    PoolDepleted { requested: u64, remaining: u64 },
}

/// Tracks the gas available to one message execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct GasPool {
    gas: u64,
}

impl GasPool {
    pub fn new() -> Self {
        Self { gas: 0 }
    }

    pub fn add_gas(mut self, amount: u64) -> Self {
        self.gas = self.gas.saturating_add(amount);
        self
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), GasError> {
        if self.gas < amount {
            return Err(GasError::PoolDepleted {
                requested: amount,
                remaining: self.gas,
            });
        }
        self.gas -= amount;
        Ok(())
    }

    pub fn gas(&self) -> u64 {
        self.gas
    }
}

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;

use super::chain::{Blockchain, BlockchainError};
use super::crypto::{update_prefixed, Address};

/// Errors that can occur while assembling a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Reference to one output of an earlier transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Id of the transaction that created the output
    pub txid: Vec<u8>,

    /// Position of the output inside that transaction
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(&self.txid), self.index)
    }
}

/// Where the value of an input comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    /// Newly issued value; no earlier output is consumed
    Coinbase,

    /// Consumes an existing output
    Spend(OutPoint),
}

/// A transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub source: InputSource,

    /// Unlock data. For spends this is the spender's address; for the
    /// coinbase it is a free-form memo. No cryptographic signature is
    /// checked anywhere.
    pub unlock: String,
}

impl TxInput {
    pub fn outpoint(&self) -> Option<&OutPoint> {
        match &self.source {
            InputSource::Spend(outpoint) => Some(outpoint),
            InputSource::Coinbase => None,
        }
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,

    /// Address the output is locked to
    pub lock: Address,
}

impl TxOutput {
    pub fn new(value: u64, lock: Address) -> Self {
        TxOutput { value, lock }
    }

    /// Whether `address` may spend this output
    pub fn is_locked_to(&self, address: &Address) -> bool {
        self.lock == *address
    }
}

/// A value transfer recorded in a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// SHA-256 over the inputs and outputs
    pub id: Vec<u8>,

    pub inputs: Vec<TxInput>,

    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Builds a transaction and fixes its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut transaction = Transaction {
            id: Vec::new(),
            inputs,
            outputs,
        };
        transaction.id = transaction.calculate_id();
        transaction
    }

    /// Creates the reward transaction that issues new value to `to`.
    ///
    /// An empty `memo` is replaced by a generated one.
    pub fn new_coinbase(to: &Address, memo: &str, reward: u64) -> Self {
        let memo = if memo.is_empty() {
            format!("Coins to {}", to)
        } else {
            memo.to_string()
        };

        let input = TxInput {
            source: InputSource::Coinbase,
            unlock: memo,
        };

        Transaction::new(vec![input], vec![TxOutput::new(reward, to.clone())])
    }

    /// Builds a transfer of `amount` from `from` to `to`
    ///
    /// # Arguments
    ///
    /// * `from` - The address whose unspent outputs are consumed
    /// * `to` - The recipient
    /// * `amount` - The value to move; must be greater than zero
    /// * `chain` - The ledger the outputs are selected from
    ///
    /// # Returns
    ///
    /// A transaction spending the first unspent outputs of `from` that cover
    /// the amount, with any surplus returned to `from` as change.
    pub fn new_transfer(
        from: &Address,
        to: &Address,
        amount: u64,
        chain: &Blockchain,
    ) -> Result<Self, BlockchainError> {
        if amount == 0 {
            return Err(TransactionError::InvalidAmount("amount must be greater than zero".to_string()).into());
        }

        let (accumulated, selection) = chain.find_spendable_outputs(from, amount)?;
        if accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: accumulated,
            }
            .into());
        }

        let inputs = selection
            .into_iter()
            .map(|outpoint| TxInput {
                source: InputSource::Spend(outpoint),
                unlock: from.0.clone(),
            })
            .collect::<Vec<_>>();

        let mut outputs = vec![TxOutput::new(amount, to.clone())];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, from.clone()));
        }

        let transaction = Transaction::new(inputs, outputs);
        debug!(
            "Built transfer {} of {} from {} to {} using {} inputs",
            transaction.id_hex(),
            amount,
            from,
            to,
            transaction.inputs.len()
        );

        Ok(transaction)
    }

    /// Hashes every field except the id itself
    pub fn calculate_id(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();

        hasher.update((self.inputs.len() as u64).to_be_bytes());
        for input in &self.inputs {
            match &input.source {
                InputSource::Coinbase => hasher.update([0u8]),
                InputSource::Spend(outpoint) => {
                    hasher.update([1u8]);
                    update_prefixed(&mut hasher, &outpoint.txid);
                    hasher.update(outpoint.index.to_be_bytes());
                }
            }
            update_prefixed(&mut hasher, input.unlock.as_bytes());
        }

        hasher.update((self.outputs.len() as u64).to_be_bytes());
        for output in &self.outputs {
            hasher.update(output.value.to_be_bytes());
            update_prefixed(&mut hasher, output.lock.0.as_bytes());
        }

        hasher.finalize().to_vec()
    }

    /// A coinbase has exactly one input and that input issues new value
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].source == InputSource::Coinbase
    }

    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }

    /// Sum of all output values
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|output| output.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coinbase_transaction() {
        let miner = Address::from("Alice");
        let transaction = Transaction::new_coinbase(&miner, "", 100);

        assert!(transaction.is_coinbase());
        assert_eq!(transaction.inputs[0].unlock, "Coins to Alice");
        assert_eq!(transaction.outputs, vec![TxOutput::new(100, miner)]);
        assert_eq!(transaction.id.len(), 32);
        assert_eq!(transaction.id, transaction.calculate_id());
    }

    #[test]
    fn test_coinbase_memo_is_kept() {
        let transaction = Transaction::new_coinbase(&Address::from("Alice"), "genesis", 100);
        assert_eq!(transaction.inputs[0].unlock, "genesis");
    }

    #[test]
    fn test_spend_is_not_coinbase() {
        let input = TxInput {
            source: InputSource::Spend(OutPoint { txid: vec![1; 32], index: 0 }),
            unlock: "Alice".to_string(),
        };
        let transaction = Transaction::new(vec![input], vec![TxOutput::new(5, Address::from("Bob"))]);

        assert!(!transaction.is_coinbase());
        assert_eq!(
            transaction.inputs[0].outpoint(),
            Some(&OutPoint { txid: vec![1; 32], index: 0 })
        );
    }

    #[test]
    fn test_two_coinbase_inputs_is_not_coinbase() {
        let input = TxInput { source: InputSource::Coinbase, unlock: String::new() };
        let transaction = Transaction::new(vec![input.clone(), input], Vec::new());
        assert!(!transaction.is_coinbase());
    }

    #[test]
    fn test_id_depends_on_content() {
        let alice = Address::from("Alice");
        let a = Transaction::new_coinbase(&alice, "memo", 100);
        let b = Transaction::new_coinbase(&alice, "memo", 101);
        let c = Transaction::new_coinbase(&alice, "other", 100);

        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id, Transaction::new_coinbase(&alice, "memo", 100).id);
    }

    #[test]
    fn test_output_lock() {
        let output = TxOutput::new(10, Address::from("Bob"));
        assert!(output.is_locked_to(&Address::from("Bob")));
        assert!(!output.is_locked_to(&Address::from("bob")));
    }
}

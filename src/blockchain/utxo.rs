use std::collections::{HashMap, HashSet};

use log::debug;

use super::chain::{Blockchain, BlockchainError};
use super::crypto::Address;
use super::transaction::{OutPoint, Transaction, TxOutput};

/// An output that no input anywhere in the chain references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub output: TxOutput,
}

/// Unspent outputs locked to one address together with the transactions
/// that created them, both in tip-to-genesis encounter order.
struct Scan {
    transactions: Vec<Transaction>,
    outputs: Vec<UnspentOutput>,
}

impl Blockchain {
    /// Single walk from tip to genesis.
    ///
    /// Every input seen so far marks its outpoint as spent, keyed by the hex
    /// id of the referenced transaction. A spend is always newer than the
    /// output it consumes, so visiting blocks newest-first and each block's
    /// transactions last-to-first guarantees the spend is recorded before
    /// the output is considered.
    fn scan_unspent(&self, address: &Address) -> Result<Scan, BlockchainError> {
        let mut spent: HashMap<String, HashSet<u32>> = HashMap::new();
        let mut scan = Scan {
            transactions: Vec::new(),
            outputs: Vec::new(),
        };

        for block in self.iter() {
            let block = block?;

            for transaction in block.transactions.iter().rev() {
                let txid = transaction.id_hex();
                let spent_here = spent.get(&txid);
                let mut owns_unspent = false;

                for (index, output) in transaction.outputs.iter().enumerate() {
                    let index = index as u32;
                    if spent_here.map_or(false, |indices| indices.contains(&index)) {
                        continue;
                    }

                    if output.is_locked_to(address) {
                        owns_unspent = true;
                        scan.outputs.push(UnspentOutput {
                            outpoint: OutPoint {
                                txid: transaction.id.clone(),
                                index,
                            },
                            output: output.clone(),
                        });
                    }
                }

                if owns_unspent {
                    scan.transactions.push(transaction.clone());
                }

                if !transaction.is_coinbase() {
                    for outpoint in transaction.inputs.iter().filter_map(|input| input.outpoint()) {
                        spent
                            .entry(hex::encode(&outpoint.txid))
                            .or_default()
                            .insert(outpoint.index);
                    }
                }
            }
        }

        debug!(
            "Found {} unspent outputs in {} transactions for {}",
            scan.outputs.len(),
            scan.transactions.len(),
            address
        );

        Ok(scan)
    }

    /// Transactions holding at least one unspent output locked to `address`.
    /// Each transaction appears once.
    pub fn find_unspent_transactions(&self, address: &Address) -> Result<Vec<Transaction>, BlockchainError> {
        Ok(self.scan_unspent(address)?.transactions)
    }

    /// Unspent outputs locked to `address`, with their outpoints
    pub fn find_unspent_outputs(&self, address: &Address) -> Result<Vec<UnspentOutput>, BlockchainError> {
        Ok(self.scan_unspent(address)?.outputs)
    }

    /// Unspent outputs locked to `address`
    pub fn find_utxo(&self, address: &Address) -> Result<Vec<TxOutput>, BlockchainError> {
        Ok(self
            .find_unspent_outputs(address)?
            .into_iter()
            .map(|unspent| unspent.output)
            .collect())
    }

    /// Sum of the values of all unspent outputs locked to `address`.
    ///
    /// A sum that does not fit in a `u64` can only come from a corrupt
    /// store and is reported as [`BlockchainError::ValueOverflow`].
    pub fn balance(&self, address: &Address) -> Result<u64, BlockchainError> {
        self.find_utxo(address)?
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value))
            .ok_or_else(|| BlockchainError::ValueOverflow(format!("balance of {}", address)))
    }

    /// First-fit selection of unspent outputs until `amount` is covered
    ///
    /// # Arguments
    ///
    /// * `address` - The address whose outputs are spent
    /// * `amount` - The value to cover
    ///
    /// # Returns
    ///
    /// The accumulated value and the selected outpoints in encounter order.
    /// The total may fall short of `amount`; callers must check.
    pub fn find_spendable_outputs(
        &self,
        address: &Address,
        amount: u64,
    ) -> Result<(u64, Vec<OutPoint>), BlockchainError> {
        let mut accumulated: u64 = 0;
        let mut selection = Vec::new();

        for unspent in self.find_unspent_outputs(address)? {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.checked_add(unspent.output.value).ok_or_else(|| {
                BlockchainError::ValueOverflow(format!("spendable outputs of {}", address))
            })?;
            selection.push(unspent.outpoint);
        }

        Ok((accumulated, selection))
    }
}

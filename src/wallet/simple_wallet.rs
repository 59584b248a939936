//! A minimal standalone Bitcoin wallet: tracked coins, P2PKH receive/change
//! addresses, coin selection that excludes pledge stubs, signing and
//! broadcast. Grounded on the teacher's `ListUnspentUtxo`/`get_outpoint`
//! shape (`internal/convert.rs`, `internal/helper.rs`) generalized from a
//! bitcoind-backed demo wallet into a self-contained one this protocol
//! needs to own its coins directly (pledge stubs must be excluded from
//! ordinary spends, which a bitcoind wallet has no concept of).

use std::collections::HashSet;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, PubkeyHash, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use rand::Rng;

use crate::config::constants;
use crate::error::WalletError;
use crate::primitives::script::ScriptKind;
use crate::primitives::sighash;
use crate::wallet::keys::WalletKeys;

/// One coin this wallet considers spendable-in-principle. Pledge stubs are
/// tracked separately (`PledgingWallet`) and excluded here by outpoint.
#[derive(Debug, Clone)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    /// The receive/change index this coin's key was derived at.
    pub derivation_index: u32,
    pub is_change: bool,
}

pub struct SimpleWallet {
    keys: WalletKeys,
    coins: Vec<Coin>,
    next_receive_index: u32,
    next_change_index: u32,
}

impl SimpleWallet {
    pub fn new(keys: WalletKeys) -> Self {
        SimpleWallet { keys, coins: Vec::new(), next_receive_index: 0, next_change_index: 0 }
    }

    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }

    /// Record a new coin the wallet controls (from a confirmed tx, a
    /// dependency tx just signed, or external scanning).
    pub fn add_coin(&mut self, coin: Coin) {
        self.coins.push(coin);
    }

    pub fn remove_coin(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        let position = self.coins.iter().position(|c| &c.outpoint == outpoint)?;
        Some(self.coins.remove(position))
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.iter().find(|c| &c.outpoint == outpoint)
    }

    pub fn coins_iter(&self) -> impl Iterator<Item = &Coin> {
        self.coins.iter()
    }

    /// The secret key owning `coin`, for callers outside this module (the
    /// pledging wallet signs pledge inputs directly rather than through
    /// `sign_p2pkh_input`, since a pledge input uses ANYONECANPAY).
    pub fn secret_for_stub(&self, coin: &Coin) -> bitcoin::secp256k1::SecretKey {
        self.secret_for_coin(coin)
    }

    pub fn balance(&self, exclude: &HashSet<OutPoint>) -> u64 {
        self.coins.iter().filter(|c| !exclude.contains(&c.outpoint)).map(|c| c.value).sum()
    }

    /// A fresh P2PKH receive address's scriptPubKey, advancing the receive
    /// chain index.
    pub fn fresh_receive_script(&mut self) -> (ScriptBuf, u32) {
        let index = self.next_receive_index;
        self.next_receive_index += 1;
        (self.p2pkh_script_at(index, false), index)
    }

    fn fresh_change_script(&mut self) -> (ScriptBuf, u32) {
        let index = self.next_change_index;
        self.next_change_index += 1;
        (self.p2pkh_script_at(index, true), index)
    }

    fn p2pkh_script_at(&self, index: u32, change: bool) -> ScriptBuf {
        let secret = if change { self.keys.change_key(index) } else { self.keys.receive_key(index) };
        let pubkey = self.keys.public_key(&secret);
        let pkh = PubkeyHash::hash(&pubkey.serialize());
        ScriptBuf::new_p2pkh(&pkh)
    }

    fn secret_for_coin(&self, coin: &Coin) -> bitcoin::secp256k1::SecretKey {
        if coin.is_change {
            self.keys.change_key(coin.derivation_index)
        } else {
            self.keys.receive_key(coin.derivation_index)
        }
    }

    /// Simple greedy coin selection over non-excluded coins: accumulate
    /// coins until the target is met. Returns the selected coins and their
    /// total value.
    fn select_coins(&self, target: u64, exclude: &HashSet<OutPoint>) -> Result<(Vec<Coin>, u64), WalletError> {
        let mut selected = Vec::new();
        let mut total = 0u64;
        for coin in &self.coins {
            if exclude.contains(&coin.outpoint) {
                continue;
            }
            selected.push(coin.clone());
            total += coin.value;
            if total >= target {
                return Ok((selected, total));
            }
        }
        Err(WalletError::InsufficientFunds { needed: target, available: total })
    }

    /// Build and sign a transaction sending exactly `value` satoshis to a
    /// fresh receive address of this same wallet, with the change output
    /// (if any) placed at a random position (spec §4.5 step 2). Returns the
    /// signed transaction and the `Coin` describing its `value`-carrying
    /// output, already at the correct derivation index so callers can spend
    /// it without reconstructing one by hand.
    ///
    /// If `empty_wallet` is set, spend the entire balance and accept
    /// whatever remains after the fixed fee as the output value (which may
    /// be less than `value`, per spec §4.5 step 2 / §9 Open Questions).
    pub fn build_dependency_tx(
        &mut self,
        value: u64,
        empty_wallet: bool,
        exclude: &HashSet<OutPoint>,
    ) -> Result<(Transaction, Coin), WalletError> {
        let fee = constants::FIXED_FEE_SATS;
        let (selected, total, output_value) = if empty_wallet {
            let total = self.balance(exclude);
            if total <= fee {
                return Err(WalletError::InsufficientFunds { needed: fee + 1, available: total });
            }
            let selected: Vec<Coin> = self.coins.iter().filter(|c| !exclude.contains(&c.outpoint)).cloned().collect();
            (selected, total, total - fee)
        } else {
            let (selected, total) = self.select_coins(value + fee, exclude)?;
            (selected, total, value)
        };

        let (receive_script, receive_index) = self.fresh_receive_script();
        let change_value = total.saturating_sub(output_value).saturating_sub(fee);

        let mut outputs = vec![TxOut { value: Amount::from_sat(output_value), script_pubkey: receive_script }];
        let mut target_index = 0u32;
        if !empty_wallet && change_value > 0 {
            let (change_script, _change_index) = self.fresh_change_script();
            let change_output = TxOut { value: Amount::from_sat(change_value), script_pubkey: change_script };
            // Random position per spec §4.5 step 2, so an observer can't
            // infer which output is the payment from position alone.
            if rand::thread_rng().gen_bool(0.5) {
                outputs.insert(0, change_output);
                target_index = 1;
            } else {
                outputs.push(change_output);
            }
        }

        let inputs: Vec<TxIn> = selected
            .iter()
            .map(|c| TxIn {
                previous_output: c.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();

        let mut tx = Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input: inputs, output: outputs };

        for (index, coin) in selected.iter().enumerate() {
            self.sign_p2pkh_input(&mut tx, index, coin)?;
        }

        // Spent coins are removed now; the caller re-adds the resulting
        // outputs as new coins once the tx is broadcast.
        for coin in &selected {
            self.remove_coin(&coin.outpoint);
        }

        let target_output = &tx.output[target_index as usize];
        let coin = Coin {
            outpoint: OutPoint { txid: tx.compute_txid(), vout: target_index },
            value: target_output.value.to_sat(),
            script_pubkey: target_output.script_pubkey.clone(),
            derivation_index: receive_index,
            is_change: false,
        };

        Ok((tx, coin))
    }

    /// Build and sign a revocation transaction spending `stub` entirely to
    /// a fresh receive address, minus one dust-floor fee (spec §4.5
    /// "Revoking").
    pub fn build_revocation_tx(&mut self, stub: &Coin) -> Result<Transaction, WalletError> {
        let fee = constants::DUST_FLOOR_SATS;
        if stub.value <= fee {
            return Err(WalletError::InsufficientFunds { needed: fee + 1, available: stub.value });
        }
        let (receive_script, _index) = self.fresh_receive_script();
        let output = TxOut { value: Amount::from_sat(stub.value - fee), script_pubkey: receive_script };
        let input = TxIn {
            previous_output: stub.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        let mut tx = Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input: vec![input], output: vec![output] };
        self.sign_p2pkh_input(&mut tx, 0, stub)?;
        Ok(tx)
    }

    /// Sign a plain SIGHASH_ALL input spending `coin`, for callers outside
    /// this module (the claim flow signs its extra fee-paying input this
    /// way, once the dependency tx that produced it has been broadcast).
    pub fn sign_fee_input(&self, tx: &mut Transaction, index: usize, coin: &Coin) -> Result<(), WalletError> {
        self.sign_p2pkh_input(tx, index, coin)
    }

    fn sign_p2pkh_input(&self, tx: &mut Transaction, index: usize, coin: &Coin) -> Result<(), WalletError> {
        let secret = self.secret_for_coin(coin);
        let pubkey = PublicKey::from_secret_key(self.keys.secp(), &secret);
        let signature = sighash::sign_input_all(self.keys.secp(), tx, index, &coin.script_pubkey, &secret)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        let script_sig = sighash::build_script_sig(
            &ScriptKind::P2pkh { pubkey_hash: PubkeyHash::hash(&pubkey.serialize()) },
            &signature,
            Some(&pubkey),
            None,
        );
        tx.input[index].script_sig = script_sig;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    fn wallet_with_coin(value: u64) -> (SimpleWallet, OutPoint) {
        let keys = WalletKeys::from_seed(&[3u8; 32], Network::Regtest).unwrap();
        let mut wallet = SimpleWallet::new(keys);
        let secret = wallet.keys().receive_key(0);
        let pubkey = PublicKey::from_secret_key(wallet.keys().secp(), &secret);
        let script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()));
        let outpoint = OutPoint { txid: bitcoin::Txid::from_byte_array([1u8; 32]), vout: 0 };
        wallet.add_coin(Coin { outpoint, value, script_pubkey: script, derivation_index: 0, is_change: false });
        (wallet, outpoint)
    }

    #[test]
    fn dependency_tx_pays_exact_value_and_signs_its_input() {
        let (mut wallet, _outpoint) = wallet_with_coin(10_000);
        let exclude = HashSet::new();
        let (tx, coin) = wallet.build_dependency_tx(2_000, false, &exclude).unwrap();
        assert_eq!(tx.output[coin.outpoint.vout as usize].value.to_sat(), 2_000);
        assert_eq!(coin.value, 2_000);
        assert_eq!(coin.outpoint.txid, tx.compute_txid());
        assert!(!tx.input[0].script_sig.is_empty());
    }

    #[test]
    fn empty_wallet_spends_entire_balance_minus_fee() {
        let (mut wallet, _outpoint) = wallet_with_coin(1_200);
        let exclude = HashSet::new();
        let (tx, coin) = wallet.build_dependency_tx(10_000, true, &exclude).unwrap();
        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[coin.outpoint.vout as usize].value.to_sat(), 1_200 - constants::FIXED_FEE_SATS);
        assert_eq!(coin.value, 1_200 - constants::FIXED_FEE_SATS);
    }

    #[test]
    fn dependency_tx_coin_carries_its_actual_derivation_index() {
        let keys = WalletKeys::from_seed(&[4u8; 32], Network::Regtest).unwrap();
        let mut wallet = SimpleWallet::new(keys);
        let secret = wallet.keys().receive_key(0);
        let pubkey = PublicKey::from_secret_key(wallet.keys().secp(), &secret);
        let script = ScriptBuf::new_p2pkh(&PubkeyHash::hash(&pubkey.serialize()));
        wallet.add_coin(Coin {
            outpoint: OutPoint { txid: bitcoin::Txid::from_byte_array([2u8; 32]), vout: 0 },
            value: 50_000,
            script_pubkey: script,
            derivation_index: 0,
            is_change: false,
        });

        // Burn receive index 0 so the next dependency tx's output lands on
        // index 1, which only the real `Coin` (not a hardcoded index)
        // reflects correctly.
        let _ = wallet.fresh_receive_script();

        let exclude = HashSet::new();
        let (_dep_tx, coin) = wallet.build_dependency_tx(5_000, false, &exclude).unwrap();
        assert_eq!(coin.derivation_index, 1);

        // A later transaction spending this coin signs correctly only
        // because `coin` carries the real derivation index.
        let mut spend = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: coin.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(coin.value), script_pubkey: ScriptBuf::new() }],
        };
        wallet.sign_fee_input(&mut spend, 0, &coin).unwrap();
        assert!(!spend.input[0].script_sig.is_empty());
    }

    #[test]
    fn excluded_stub_is_not_selected() {
        let (mut wallet, outpoint) = wallet_with_coin(10_000);
        let mut exclude = HashSet::new();
        exclude.insert(outpoint);
        let result = wallet.build_dependency_tx(2_000, false, &exclude);
        assert!(matches!(result, Err(WalletError::InsufficientFunds { .. })));
    }
}

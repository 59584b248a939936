//! Process-wide persistence store for server mode (spec §4.6): projects and
//! their pledge sets survive a restart. Keyed by project id hex.

use std::path::Path;
use std::sync::Arc;

use crate::envelope::pledge::Pledge;
use crate::error::CrowdfundError;

const PROJECTS_TREE: &str = "projects";
const OPEN_PLEDGES_TREE: &str = "open_pledges";
const CLAIMED_PLEDGES_TREE: &str = "claimed_pledges";
const LIFECYCLE_TREE: &str = "lifecycle";

/// Thin wrapper over a `sled::Db`: one tree per collection, everything
/// else is plain get/insert/scan.
#[derive(Clone)]
pub struct Db {
    inner: Arc<sled::Db>,
}

impl Db {
    pub fn open(data_dir: &Path) -> Result<Self, CrowdfundError> {
        let inner = sled::open(data_dir.join("state.sled"))?;
        Ok(Db { inner: Arc::new(inner) })
    }

    pub fn close(&self) -> Result<(), CrowdfundError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn store_project_bytes(&self, id_hex: &str, raw_bytes: &[u8]) -> Result<(), CrowdfundError> {
        let tree = self.inner.open_tree(PROJECTS_TREE)?;
        tree.insert(id_hex.as_bytes(), raw_bytes)?;
        Ok(())
    }

    pub fn load_project_bytes(&self, id_hex: &str) -> Result<Option<Vec<u8>>, CrowdfundError> {
        let tree = self.inner.open_tree(PROJECTS_TREE)?;
        Ok(tree.get(id_hex.as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn all_project_bytes(&self) -> Result<Vec<Vec<u8>>, CrowdfundError> {
        let tree = self.inner.open_tree(PROJECTS_TREE)?;
        tree.iter().values().map(|v| v.map(|bytes| bytes.to_vec()).map_err(CrowdfundError::from)).collect()
    }

    fn pledge_tree(&self, project_id_hex: &str, claimed: bool) -> Result<sled::Tree, CrowdfundError> {
        let name = format!("{}:{}", if claimed { CLAIMED_PLEDGES_TREE } else { OPEN_PLEDGES_TREE }, project_id_hex);
        Ok(self.inner.open_tree(name)?)
    }

    pub fn store_pledge(&self, project_id_hex: &str, claimed: bool, pledge: &Pledge) -> Result<(), CrowdfundError> {
        let tree = self.pledge_tree(project_id_hex, claimed)?;
        tree.insert(pledge.id_hex().as_bytes(), pledge.encode())?;
        Ok(())
    }

    pub fn remove_pledge(&self, project_id_hex: &str, claimed: bool, pledge_id_hex: &str) -> Result<(), CrowdfundError> {
        let tree = self.pledge_tree(project_id_hex, claimed)?;
        tree.remove(pledge_id_hex.as_bytes())?;
        Ok(())
    }

    pub fn load_pledges(&self, project_id_hex: &str, claimed: bool) -> Result<Vec<Pledge>, CrowdfundError> {
        let tree = self.pledge_tree(project_id_hex, claimed)?;
        tree.iter()
            .values()
            .map(|v| {
                let bytes = v?;
                Pledge::parse(&bytes).map_err(CrowdfundError::from)
            })
            .collect()
    }

    /// Persist the txid of the transaction that claimed a project, so a
    /// restart can restore `Lifecycle::Claimed` without re-observing the
    /// chain.
    pub fn store_claim_txid(&self, project_id_hex: &str, txid: &bitcoin::Txid) -> Result<(), CrowdfundError> {
        let tree = self.inner.open_tree(LIFECYCLE_TREE)?;
        tree.insert(project_id_hex.as_bytes(), txid.to_string().as_bytes())?;
        Ok(())
    }

    pub fn load_claim_txid(&self, project_id_hex: &str) -> Result<Option<bitcoin::Txid>, CrowdfundError> {
        let tree = self.inner.open_tree(LIFECYCLE_TREE)?;
        let Some(value) = tree.get(project_id_hex.as_bytes())? else {
            return Ok(None);
        };
        let txid = std::str::from_utf8(&value)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CrowdfundError::Inconsistent(format!("corrupt claim txid stored for project {project_id_hex}")))?;
        Ok(Some(txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_bytes_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Db::open(dir.path()).unwrap();
            db.store_project_bytes("abc", b"hello").unwrap();
            db.close().unwrap();
        }
        let reopened = Db::open(dir.path()).unwrap();
        assert_eq!(reopened.load_project_bytes("abc").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn removed_pledge_is_absent_from_load() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path()).unwrap();
        let tx = bitcoin::Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        let pledge = Pledge::new(Vec::new(), tx, 1_000, "deadbeef".to_string());
        db.store_pledge("deadbeef", false, &pledge).unwrap();
        assert_eq!(db.load_pledges("deadbeef", false).unwrap().len(), 1);

        db.remove_pledge("deadbeef", false, &pledge.id_hex()).unwrap();
        assert!(db.load_pledges("deadbeef", false).unwrap().is_empty());
    }

    #[test]
    fn claim_txid_survives_a_reopen() {
        use bitcoin::hashes::Hash;

        let dir = tempfile::tempdir().unwrap();
        let txid = bitcoin::Txid::from_byte_array([7u8; 32]);
        {
            let db = Db::open(dir.path()).unwrap();
            assert_eq!(db.load_claim_txid("abc").unwrap(), None);
            db.store_claim_txid("abc", &txid).unwrap();
            db.close().unwrap();
        }
        let reopened = Db::open(dir.path()).unwrap();
        assert_eq!(reopened.load_claim_txid("abc").unwrap(), Some(txid));
    }
}

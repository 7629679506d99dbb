//! Resources register lifecycle operations by implementing [`Resource`].
use async_trait::async_trait;
use nsx_api::{NsxResult, Transport};

use crate::{
    data::ResourceData,
    schema::{self, Field},
};

/// A kind of remote object managed through create/read/update/delete.
///
/// The client is passed to every operation; resources hold no connection
/// state of their own. Operations run one at a time: nothing here guards
/// against two operations on the same remote object overlapping.
#[async_trait]
pub trait Resource<T: Transport + ?Sized>: Send + Sync + 'static {
    /// resource type name, ex. `nsx_firewall_rule`
    fn kind(&self) -> &'static str;

    /// declared configuration fields
    fn schema(&self) -> &'static [Field];

    /// create the remote object and record its id on `data`
    async fn create(&self, client: &T, data: &mut ResourceData) -> NsxResult<()>;

    /// refresh `data` from the remote object. A resource that no longer
    /// exists remotely has its id cleared, it is not an error
    async fn read(&self, client: &T, data: &mut ResourceData) -> NsxResult<()>;

    /// move the remote object from `prior` (the state last applied) to `data`.
    /// Defaults to replacing it, for resources whose every field forces a new
    /// object
    async fn update(
        &self,
        client: &T,
        prior: &ResourceData,
        data: &mut ResourceData,
    ) -> NsxResult<()> {
        schema::validate(self.schema(), data.attrs_mut())?;
        let mut old = prior.clone();
        self.delete(client, &mut old).await?;
        data.clear_id();
        self.create(client, data).await
    }

    /// remove the remote object and clear the id. Removing an object that is
    /// already gone succeeds
    async fn delete(&self, client: &T, data: &mut ResourceData) -> NsxResult<()>;
}

//! All-or-nothing seeding of a generation from its manifest.

use futures_util::future::try_join_all;

use super::connection::CacheDb;
use crate::generation::GenerationKind;
use crate::identity::RequestIdentity;
use crate::network::Fetcher;
use crate::request::ProxyRequest;
use crate::Error;

impl CacheDb {
    /// Fetch every manifest identity and store the results under `generation`.
    ///
    /// All fetches run concurrently. Any transport failure or non-2xx status
    /// aborts the seed before anything is written; the write itself is one
    /// transaction. On failure the store is unchanged.
    pub async fn seed(
        &self, generation: &str, kind: GenerationKind, manifest: &[RequestIdentity], fetcher: &dyn Fetcher,
    ) -> Result<usize, Error> {
        self.seed_with(generation, kind, manifest, fetcher, &[]).await
    }

    /// [`CacheDb::seed`], also registering `companions` in the same write.
    ///
    /// A companion that cannot be registered fails the whole seed.
    pub async fn seed_with(
        &self, generation: &str, kind: GenerationKind, manifest: &[RequestIdentity], fetcher: &dyn Fetcher,
        companions: &[(&str, GenerationKind)],
    ) -> Result<usize, Error> {
        let seed_failed = |reason: String| Error::SeedFailed { generation: generation.to_string(), reason };

        let fetches = manifest.iter().map(|identity| async move {
            let request = ProxyRequest::new(identity.method().clone(), identity.url().clone());
            let response = fetcher
                .fetch(&request)
                .await
                .map_err(|e| seed_failed(format!("{identity}: {e}")))?;
            if !response.status.is_success() {
                return Err(seed_failed(format!("{identity}: status {}", response.status.as_u16())));
            }
            Ok((identity.clone(), response))
        });

        let entries = try_join_all(fetches).await?;

        self.put_all(generation, kind, &entries, companions)
            .await
            .map_err(|e| seed_failed(e.to_string()))?;

        tracing::info!(generation, entries = entries.len(), "seeded generation");
        Ok(entries.len())
    }
}

use futures::{Stream, TryStreamExt};

use crate::error::AppResult;
use crate::storage::{ObjectStore, StorageObject};

/// Lists every leaf object under `prefix`, following page tokens and
/// descending into folder entries. Each call starts from scratch.
pub fn enumerate<'a, S>(
    store: &'a S,
    bucket: &'a str,
    prefix: &'a str,
) -> impl Stream<Item = AppResult<StorageObject>> + Send + 'a
where
    S: ObjectStore + ?Sized,
{
    async_stream::try_stream! {
        let mut pending = vec![prefix.to_string()];

        while let Some(current) = pending.pop() {
            let mut folders = Vec::new();
            let mut token = None;

            loop {
                let page = store.list(bucket, &current, token.take()).await?;
                for object in page.objects {
                    yield object;
                }
                folders.extend(page.prefixes.into_iter().filter(|p| *p != current));

                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }

            tracing::debug!("Listed prefix: bucket={}, prefix={}, folders={}", bucket, current, folders.len());
            pending.extend(folders.into_iter().rev());
        }
    }
}

/// Drains [`enumerate`] into a vector; the first listing error aborts.
pub async fn enumerate_all<S>(store: &S, bucket: &str, prefix: &str) -> AppResult<Vec<StorageObject>>
where
    S: ObjectStore + ?Sized,
{
    enumerate(store, bucket, prefix).try_collect().await
}

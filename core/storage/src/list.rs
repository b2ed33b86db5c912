//! Lazy listing over driver pages.

use futures::stream::{self, Stream};
use std::collections::VecDeque;

use cloudblob_common::Result;

use crate::bucket::Bucket;
use crate::driver::{ListObject, ListOptions};

/// Iterator over the objects under a prefix, fetching one page at a time.
///
/// Pages are requested on demand, so a listing that is dropped early costs
/// nothing beyond the pages already fetched.
#[derive(Debug)]
pub struct ListIter {
    bucket: Bucket,
    opts: ListOptions,
    buffered: VecDeque<ListObject>,
    done: bool,
}

impl ListIter {
    pub(crate) fn new(bucket: Bucket, opts: ListOptions) -> Self {
        Self {
            bucket,
            opts,
            buffered: VecDeque::new(),
            done: false,
        }
    }

    /// Next object, or `None` when the listing is exhausted.
    pub async fn next(&mut self) -> Result<Option<ListObject>> {
        while self.buffered.is_empty() && !self.done {
            let page = self.bucket.list_page(&self.opts).await?;
            match page.next_page_token {
                Some(token) => self.opts.page_token = Some(token),
                None => self.done = true,
            }
            self.buffered.extend(page.objects);
        }
        Ok(self.buffered.pop_front())
    }

    /// Token that restarts a listing right after the buffered page, if the
    /// buffered objects are all consumed and more pages remain.
    pub fn resume_token(&self) -> Option<&str> {
        if self.buffered.is_empty() && !self.done {
            self.opts.page_token.as_deref()
        } else {
            None
        }
    }

    /// Drain the listing into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<ListObject>> {
        let mut out = Vec::new();
        while let Some(obj) = self.next().await? {
            out.push(obj);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ListObject>> + Send {
        stream::try_unfold(self, |mut iter| async move {
            Ok(iter.next().await?.map(|obj| (obj, iter)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memblob::{self, MemClient};
    use crate::writer::WriterOptions;
    use futures::TryStreamExt;

    async fn bucket_with(keys: &[&str]) -> Bucket {
        let client = MemClient::new("local");
        client.create_bucket("list").unwrap();
        let bucket = memblob::open_bucket(client, "list").unwrap();
        for key in keys {
            bucket
                .write_all(key, key.as_bytes(), "text/plain", WriterOptions::new())
                .await
                .unwrap();
        }
        bucket
    }

    #[tokio::test]
    async fn test_list_across_pages() {
        let bucket = bucket_with(&["p/1", "p/2", "p/3", "p/4", "p/5", "q/1"]).await;
        let objects = bucket
            .list(ListOptions::with_prefix("p/").page_size(2))
            .collect_all()
            .await
            .unwrap();
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["p/1", "p/2", "p/3", "p/4", "p/5"]);
    }

    #[tokio::test]
    async fn test_resume_token_restarts_listing() {
        let bucket = bucket_with(&["a", "b", "c", "d"]).await;
        let mut iter = bucket.list(ListOptions::default().page_size(2));
        assert_eq!(iter.next().await.unwrap().unwrap().key.as_str(), "a");
        assert!(iter.resume_token().is_none());
        assert_eq!(iter.next().await.unwrap().unwrap().key.as_str(), "b");

        let token = iter.resume_token().unwrap().to_string();
        let rest = bucket
            .list(ListOptions::default().page_size(2).page_token(token))
            .collect_all()
            .await
            .unwrap();
        let keys: Vec<_> = rest.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let bucket = bucket_with(&["x/1", "x/2"]).await;
        let objects: Vec<_> = bucket
            .list(ListOptions::with_prefix("x/"))
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let bucket = bucket_with(&[]).await;
        let mut iter = bucket.list(ListOptions::default());
        assert!(iter.next().await.unwrap().is_none());
        assert!(iter.resume_token().is_none());
    }
}

//! The portable conformance battery.
//!
//! Every case gets a fresh bucket and records only deterministic
//! observations (sizes, content types, listed keys) in its snapshot.

use anyhow::{anyhow, bail, ensure, Context};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use cloudblob_storage::{
    Bucket, Error, ErrorCode, ListOptions, ListPage, Result, WriterOptions,
};

use crate::golden::Snapshot;
use crate::harness::AsTest;

type CaseFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

pub(crate) type CaseFn = for<'a> fn(&'a Bucket, &'a mut Snapshot) -> CaseFuture<'a>;

pub(crate) const PORTABLE_CASES: &[(&str, CaseFn)] = &[
    ("attributes_not_found", attributes_not_found),
    ("reader_not_found", reader_not_found),
    ("delete_not_found", delete_not_found),
    ("write_read", write_read),
    ("range_read", range_read),
    ("attributes", attributes),
    ("list", list),
    ("delete", delete),
    ("writer_not_closed", writer_not_closed),
    ("writer_abort", writer_abort),
    ("overwrite", overwrite),
    ("cancellation", cancellation),
    ("concurrent_readers", concurrent_readers),
];

/// Names of the portable cases, in execution order.
pub fn portable_case_names() -> impl Iterator<Item = &'static str> {
    PORTABLE_CASES.iter().map(|(name, _)| *name)
}

pub(crate) enum Case {
    Portable(CaseFn),
    As(Arc<dyn AsTest>),
}

impl Case {
    pub(crate) async fn execute(
        &self,
        bucket: &Bucket,
        snapshot: &mut Snapshot,
    ) -> anyhow::Result<()> {
        match self {
            Case::Portable(case) => case(bucket, snapshot).await,
            Case::As(as_test) => as_case(bucket, snapshot, as_test.clone()).await,
        }
    }
}

/// Require `result` to be an error with `code`.
fn expect_code<T: Debug>(
    op: &str,
    key: &str,
    result: Result<T>,
    code: ErrorCode,
) -> anyhow::Result<()> {
    match result {
        Err(err) if err.code() == code => Ok(()),
        Err(err) => bail!("{} {:?}: expected {}, got {} ({})", op, key, code, err.code(), err),
        Ok(value) => bail!("{} {:?}: expected {}, got Ok({:?})", op, key, code, value),
    }
}

/// Deterministic payload of `len` bytes.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn put(bucket: &Bucket, key: &str, data: &[u8], content_type: &str) -> anyhow::Result<()> {
    bucket
        .write_all(key, data, content_type, WriterOptions::new())
        .await
        .with_context(|| format!("write {:?}", key))
}

async fn read(bucket: &Bucket, key: &str) -> anyhow::Result<Vec<u8>> {
    bucket.read_all(key).await.with_context(|| format!("read {:?}", key))
}

fn attributes_not_found<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "does-not-exist";
        expect_code("attributes", key, bucket.attributes(key).await, ErrorCode::NotFound)?;
        ensure!(!bucket.exists(key).await?, "exists {:?}: expected false", key);
        Ok(())
    })
}

fn reader_not_found<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "does-not-exist";
        let result = bucket.new_reader(key).await.map(|r| r.size());
        expect_code("new_reader", key, result, ErrorCode::NotFound)?;
        let result = bucket.new_range_reader(key, 0, Some(1)).await.map(|r| r.size());
        expect_code("new_range_reader", key, result, ErrorCode::NotFound)
    })
}

fn delete_not_found<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "does-not-exist";
        expect_code("delete", key, bucket.delete(key).await, ErrorCode::NotFound)
    })
}

fn write_read<'a>(bucket: &'a Bucket, snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let mut sizes = Vec::new();
        for len in [0usize, 1, 100, 64 * 1024 + 7] {
            let key = format!("write-read/{}", len);
            let data = payload(len);

            let mut writer = bucket
                .new_writer(&key, "application/octet-stream", WriterOptions::new())
                .await
                .with_context(|| format!("new_writer {:?}", key))?;
            for chunk in data.chunks(4096) {
                writer
                    .write_all(chunk)
                    .await
                    .with_context(|| format!("write {:?}", key))?;
            }
            ensure!(
                writer.bytes_written() == len as u64,
                "write {:?}: {} bytes accepted, expected {}",
                key,
                writer.bytes_written(),
                len
            );
            writer.close().await.with_context(|| format!("close {:?}", key))?;

            let mut reader = bucket
                .new_reader(&key)
                .await
                .with_context(|| format!("new_reader {:?}", key))?;
            ensure!(
                reader.size() == len as u64,
                "reader {:?}: size {}, expected {}",
                key,
                reader.size(),
                len
            );
            let got = reader
                .read_to_end()
                .await
                .with_context(|| format!("read {:?}", key))?;
            reader.close().await.with_context(|| format!("close reader {:?}", key))?;
            ensure!(got == data, "read {:?}: content differs from what was written", key);

            let attrs = bucket
                .attributes(&key)
                .await
                .with_context(|| format!("attributes {:?}", key))?;
            ensure!(
                attrs.size == len as u64,
                "attributes {:?}: size {}, expected {}",
                key,
                attrs.size,
                len
            );
            sizes.push(attrs.size);
        }
        snap.record("sizes", sizes);
        Ok(())
    })
}

fn range_read<'a>(bucket: &'a Bucket, snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "range";
        let data = b"0123456789abcdef".to_vec();
        let len = data.len() as u64;
        put(bucket, key, &data, "text/plain").await?;

        let cases: [(u64, Option<u64>, &[u8]); 5] = [
            (0, Some(4), &b"0123"[..]),
            (10, None, &b"abcdef"[..]),
            (12, Some(100), &b"cdef"[..]),
            (5, Some(0), &b""[..]),
            (len, None, &b""[..]),
        ];
        let mut observed = Vec::new();
        for (offset, length, want) in cases {
            let mut reader = bucket
                .new_range_reader(key, offset, length)
                .await
                .with_context(|| format!("new_range_reader {:?} at {}+{:?}", key, offset, length))?;
            ensure!(
                reader.size() == len,
                "range reader {:?}: size {} should be the full object size {}",
                key,
                reader.size(),
                len
            );
            let got = reader.read_to_end().await.with_context(|| format!("read {:?}", key))?;
            reader.close().await?;
            ensure!(
                got == want,
                "range {:?} at {}+{:?}: got {:?}, expected {:?}",
                key,
                offset,
                length,
                String::from_utf8_lossy(&got),
                String::from_utf8_lossy(want)
            );
            observed.push(String::from_utf8_lossy(&got).into_owned());
        }

        let result = bucket.new_range_reader(key, len + 1, None).await.map(|r| r.size());
        expect_code("new_range_reader", key, result, ErrorCode::InvalidRange)?;

        snap.record("ranges", observed);
        Ok(())
    })
}

fn attributes<'a>(bucket: &'a Bucket, snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "attrs/blob.html";
        let opts = WriterOptions::new()
            .with_metadata("owner", "conformance")
            .with_metadata("stage", "attributes");
        bucket
            .write_all(key, b"<p>hi</p>", "text/html", opts)
            .await
            .with_context(|| format!("write {:?}", key))?;

        let attrs = bucket
            .attributes(key)
            .await
            .with_context(|| format!("attributes {:?}", key))?;
        ensure!(
            attrs.content_type == "text/html",
            "attributes {:?}: content type {:?}, expected \"text/html\"",
            key,
            attrs.content_type
        );
        ensure!(attrs.size == 9, "attributes {:?}: size {}, expected 9", key, attrs.size);
        for (k, v) in [("owner", "conformance"), ("stage", "attributes")] {
            ensure!(
                attrs.metadata.get(k).map(String::as_str) == Some(v),
                "attributes {:?}: metadata {:?} is {:?}, expected {:?}",
                key,
                k,
                attrs.metadata.get(k),
                v
            );
        }
        ensure!(
            attrs.etag.as_deref().is_some_and(|e| !e.is_empty()),
            "attributes {:?}: missing etag",
            key
        );

        let reader = bucket.new_reader(key).await.with_context(|| format!("new_reader {:?}", key))?;
        ensure!(
            reader.content_type() == "text/html",
            "reader {:?}: content type {:?}, expected \"text/html\"",
            key,
            reader.content_type()
        );
        reader.close().await?;

        put(bucket, "attrs/default", b"x", "").await?;
        let default = bucket.attributes("attrs/default").await?;

        let mut metadata: Vec<_> = attrs.metadata.iter().collect();
        metadata.sort();
        snap.record("content_type", attrs.content_type.clone());
        snap.record("default_content_type", default.content_type);
        snap.record("size", attrs.size);
        snap.record("metadata", serde_json::to_value(metadata)?);
        Ok(())
    })
}

fn list<'a>(bucket: &'a Bucket, snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let prefix = "list/";
        let want: BTreeSet<String> = (0..5).map(|i| format!("{}item-{}", prefix, i)).collect();
        for key in &want {
            put(bucket, key, key.as_bytes(), "text/plain").await?;
        }
        put(bucket, "listing-decoy", b"x", "text/plain").await?;
        put(bucket, "other/item-0", b"x", "text/plain").await?;

        let all = bucket
            .list(ListOptions::with_prefix(prefix))
            .collect_all()
            .await
            .with_context(|| format!("list {:?}", prefix))?;
        let got: BTreeSet<String> = all.iter().map(|o| o.key.to_string()).collect();
        ensure!(got == want, "list {:?}: got {:?}, expected {:?}", prefix, got, want);
        for obj in &all {
            ensure!(
                obj.size == obj.key.as_str().len() as u64,
                "list {:?}: {} has size {}",
                prefix,
                obj.key,
                obj.size
            );
        }

        // Page through two at a time.
        let mut paged = Vec::new();
        let mut pages = 0;
        let mut opts = ListOptions::with_prefix(prefix).page_size(2);
        let mut second_page_token = None;
        loop {
            let page = bucket
                .list_page(&opts)
                .await
                .with_context(|| format!("list {:?} page {}", prefix, pages))?;
            pages += 1;
            ensure!(
                page.objects.len() <= 2,
                "list {:?}: page of {} exceeds page size 2",
                prefix,
                page.objects.len()
            );
            paged.extend(page.objects.iter().map(|o| o.key.to_string()));
            match page.next_page_token {
                Some(token) => {
                    if pages == 1 {
                        second_page_token = Some(token.clone());
                    }
                    opts.page_token = Some(token);
                }
                None => break,
            }
            if pages > 10 {
                bail!("list {:?}: paging did not terminate", prefix);
            }
        }
        let paged_set: BTreeSet<String> = paged.iter().cloned().collect();
        ensure!(
            paged.len() == want.len() && paged_set == want,
            "list {:?}: paged listing returned {:?}",
            prefix,
            paged
        );

        // A saved token restarts at the same place.
        let token = second_page_token
            .ok_or_else(|| anyhow!("list {:?}: no token after first page", prefix))?;
        let opts = ListOptions::with_prefix(prefix).page_size(2).page_token(token);
        let first = bucket.list_page(&opts).await?;
        let again = bucket.list_page(&opts).await?;
        let keys = |p: &ListPage| {
            p.objects
                .iter()
                .map(|o| o.key.to_string())
                .collect::<Vec<_>>()
        };
        ensure!(
            keys(&first) == keys(&again),
            "list {:?}: restarting from a token gave {:?} then {:?}",
            prefix,
            keys(&first),
            keys(&again)
        );

        let empty = bucket.list(ListOptions::with_prefix("nothing-here/")).collect_all().await?;
        ensure!(empty.is_empty(), "list \"nothing-here/\": got {} objects", empty.len());

        snap.record("keys", want.into_iter().collect::<Vec<_>>());
        snap.record("pages", pages);
        Ok(())
    })
}

fn delete<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "delete/me";
        put(bucket, key, b"bye", "text/plain").await?;
        bucket.delete(key).await.with_context(|| format!("delete {:?}", key))?;

        expect_code("attributes", key, bucket.attributes(key).await, ErrorCode::NotFound)?;
        let result = bucket.new_reader(key).await.map(|r| r.size());
        expect_code("new_reader", key, result, ErrorCode::NotFound)?;
        expect_code("delete", key, bucket.delete(key).await, ErrorCode::NotFound)
    })
}

fn writer_not_closed<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "unclosed";
        let mut writer = bucket
            .new_writer(key, "text/plain", WriterOptions::new())
            .await
            .with_context(|| format!("new_writer {:?}", key))?;
        writer.write_all(b"never committed").await?;
        drop(writer);

        ensure!(
            !bucket.exists(key).await?,
            "writer {:?}: dropped writer left an object behind",
            key
        );
        Ok(())
    })
}

fn writer_abort<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "aborted";
        put(bucket, key, b"original", "text/plain").await?;

        let mut writer = bucket
            .new_writer(key, "text/plain", WriterOptions::new())
            .await
            .with_context(|| format!("new_writer {:?}", key))?;
        writer.write_all(b"replacement").await?;
        writer.abort().await.with_context(|| format!("abort {:?}", key))?;

        let got = read(bucket, key).await?;
        ensure!(got == b"original", "abort {:?}: object was replaced", key);
        Ok(())
    })
}

fn overwrite<'a>(bucket: &'a Bucket, snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "overwrite";
        put(bucket, key, b"first version", "text/plain").await?;
        let before = bucket.attributes(key).await?;
        put(bucket, key, b"{}", "application/json").await?;
        let after = bucket.attributes(key).await?;

        let got = read(bucket, key).await?;
        ensure!(got == b"{}", "overwrite {:?}: read back {:?}", key, String::from_utf8_lossy(&got));
        ensure!(
            after.content_type == "application/json" && after.size == 2,
            "overwrite {:?}: attributes {:?}",
            key,
            after
        );
        ensure!(before.etag != after.etag, "overwrite {:?}: etag did not change", key);

        snap.record("content_type", after.content_type);
        snap.record("size", after.size);
        Ok(())
    })
}

fn cancellation<'a>(bucket: &'a Bucket, _snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "cancel/partial";
        let token = CancellationToken::new();
        let scoped = bucket.with_cancellation(token.clone());

        let mut writer = scoped
            .new_writer(key, "text/plain", WriterOptions::new())
            .await
            .with_context(|| format!("new_writer {:?}", key))?;
        writer.write_all(b"half an upload").await?;
        token.cancel();
        expect_code("close", key, writer.close().await, ErrorCode::Cancelled)?;
        ensure!(!bucket.exists(key).await?, "cancelled write {:?} left an object behind", key);

        expect_code("attributes", key, scoped.attributes(key).await, ErrorCode::Cancelled)?;
        let result = scoped.new_reader(key).await.map(|r| r.size());
        expect_code("new_reader", key, result, ErrorCode::Cancelled)?;
        let result = scoped.list_page(&ListOptions::default()).await.map(|p| p.objects.len());
        expect_code("list", "", result, ErrorCode::Cancelled)
    })
}

fn concurrent_readers<'a>(bucket: &'a Bucket, snap: &'a mut Snapshot) -> CaseFuture<'a> {
    Box::pin(async move {
        let key = "shared";
        let data = payload(10_000);
        put(bucket, key, &data, "application/octet-stream").await?;

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                let offset = i * 1000;
                let mut reader = bucket.new_range_reader(key, offset, Some(1000)).await?;
                let got = reader.read_to_end().await?;
                reader.close().await?;
                Ok::<_, Error>((offset, got))
            }));
        }
        for handle in handles {
            let (offset, got) = handle
                .await
                .context("reader task panicked")?
                .with_context(|| format!("concurrent read {:?}", key))?;
            let start = offset as usize;
            ensure!(
                got == data[start..start + 1000],
                "concurrent read {:?} at {}: content differs",
                key,
                offset
            );
        }
        snap.record("readers", 8);
        Ok(())
    })
}

/// Drive one [`AsTest`] through a write, head, read and delete.
async fn as_case(
    bucket: &Bucket,
    _snap: &mut Snapshot,
    as_test: Arc<dyn AsTest>,
) -> anyhow::Result<()> {
    let name = as_test.name().to_string();
    let key = "dir/a.txt";
    let content = b"hello world";

    as_test
        .bucket_check(bucket)
        .with_context(|| format!("{}: bucket_check", name))?;

    let calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = calls.clone();
    let hook_test = as_test.clone();
    let opts = WriterOptions::new().before_write(move |probe| {
        hook_calls.fetch_add(1, Ordering::SeqCst);
        hook_test
            .before_write(probe)
            .map_err(|e| Error::Config(format!("{:#}", e)))
    });
    let mut writer = bucket
        .new_writer(key, "text/plain", opts)
        .await
        .with_context(|| format!("{}: new_writer {:?}", name, key))?;
    let hook_runs = calls.load(Ordering::SeqCst);
    if hook_runs != 1 {
        writer.abort().await?;
        bail!("{}: before_write ran {} times, expected once", name, hook_runs);
    }
    writer.write_all(content).await?;
    writer
        .close()
        .await
        .with_context(|| format!("{}: close {:?}", name, key))?;

    let attrs = bucket
        .attributes(key)
        .await
        .with_context(|| format!("{}: attributes {:?}", name, key))?;
    as_test
        .attributes_check(&attrs)
        .with_context(|| format!("{}: attributes_check", name))?;

    let mut reader = bucket
        .new_reader(key)
        .await
        .with_context(|| format!("{}: new_reader {:?}", name, key))?;
    as_test
        .reader_check(&reader)
        .with_context(|| format!("{}: reader_check", name))?;
    let got = reader.read_to_end().await?;
    reader.close().await?;
    ensure!(got == content, "{}: read {:?} returned different content", name, key);

    bucket
        .delete(key)
        .await
        .with_context(|| format!("{}: delete {:?}", name, key))?;
    Ok(())
}

//! Tree export: walk a live tree in pre-order and write every node to a
//! stream.
//!
//! Children are visited in byte order of their names, so a parent always
//! precedes its descendants and the output is deterministic for an
//! unchanging tree. The parallel walk fetches one tree level at a time and
//! reorders the results before writing; its output is identical to the
//! sequential walk.

use std::collections::BTreeMap;
use std::io::Write;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use zkm_codec::StreamWriter;
use zkm_session::TreeSession;
use zkm_types::path::{is_system_path, join, segments, validate_path};
use zkm_types::{NodeRecord, NodeSnapshot};

use crate::error::{MigrateError, MigrateResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportOptions {
    /// Concurrent node reads. `1` walks the tree sequentially.
    pub concurrency: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Records written to the stream.
    pub records: u64,
    /// Ephemeral nodes among them.
    pub ephemeral: u64,
    /// Nodes listed by their parent that were gone by the time they were read.
    pub vanished: u64,
}

/// A fetched node and the names of its children.
type Fetched = Option<(NodeSnapshot, Vec<String>)>;

#[derive(Clone, Debug, Default)]
pub struct TreeExporter {
    options: ExportOptions,
}

impl TreeExporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Export the subtree at `root` into `writer`.
    ///
    /// The reserved system subtree is never exported. A node that vanishes
    /// between being listed and being read is left out and counted.
    pub async fn export<W: Write>(
        &self,
        session: &dyn TreeSession,
        root: &str,
        writer: &mut StreamWriter<W>,
    ) -> MigrateResult<ExportReport> {
        validate_path(root).map_err(|e| MigrateError::Config(e.to_string()))?;
        if self.options.concurrency == 0 {
            return Err(MigrateError::Config("export concurrency must be at least 1".into()));
        }

        info!(
            source = %session.describe(),
            root,
            concurrency = self.options.concurrency,
            "export started"
        );
        let report = if self.options.concurrency == 1 {
            self.walk_sequential(session, root, writer).await?
        } else {
            self.walk_parallel(session, root, writer).await?
        };
        if report.vanished > 0 {
            warn!(vanished = report.vanished, "nodes disappeared during export");
        }
        info!(
            records = report.records,
            ephemeral = report.ephemeral,
            "export finished"
        );
        Ok(report)
    }

    async fn walk_sequential<W: Write>(
        &self,
        session: &dyn TreeSession,
        root: &str,
        writer: &mut StreamWriter<W>,
    ) -> MigrateResult<ExportReport> {
        let mut report = ExportReport::default();
        let mut stack = vec![root.to_string()];

        while let Some(path) = stack.pop() {
            let Some((node, children)) = fetch(session, &path).await? else {
                if path == root {
                    return Err(MigrateError::MissingRoot { path });
                }
                debug!(path = %path, "node vanished before it was read");
                report.vanished += 1;
                continue;
            };
            // Reverse so the smallest name is popped first.
            for name in children.iter().rev() {
                let child = join(&path, name);
                if !is_system_path(&child) {
                    stack.push(child);
                }
            }
            emit(writer, node.into_record(path), &mut report)?;
        }
        Ok(report)
    }

    async fn walk_parallel<W: Write>(
        &self,
        session: &dyn TreeSession,
        root: &str,
        writer: &mut StreamWriter<W>,
    ) -> MigrateResult<ExportReport> {
        let mut report = ExportReport::default();
        // Keyed by path segments: iteration order is the pre-order walk.
        let mut collected: BTreeMap<Vec<String>, NodeRecord> = BTreeMap::new();
        let mut frontier = vec![root.to_string()];

        while !frontier.is_empty() {
            let level: Vec<(String, MigrateResult<Fetched>)> = stream::iter(frontier.drain(..))
                .map(|path| async move {
                    let fetched = fetch(session, &path).await;
                    (path, fetched)
                })
                .buffer_unordered(self.options.concurrency)
                .collect()
                .await;

            let mut next = Vec::new();
            for (path, fetched) in level {
                let Some((node, children)) = fetched? else {
                    if path == root {
                        return Err(MigrateError::MissingRoot { path });
                    }
                    debug!(path = %path, "node vanished before it was read");
                    report.vanished += 1;
                    continue;
                };
                next.extend(
                    children
                        .iter()
                        .map(|name| join(&path, name))
                        .filter(|child| !is_system_path(child)),
                );
                let key = segments(&path).into_iter().map(str::to_string).collect();
                collected.insert(key, node.into_record(path));
            }
            frontier = next;
        }

        for record in collected.into_values() {
            emit(writer, record, &mut report)?;
        }
        Ok(report)
    }
}

/// Read a node and, unless it is ephemeral, its sorted child names.
async fn fetch(session: &dyn TreeSession, path: &str) -> MigrateResult<Fetched> {
    let describe = || session.describe();
    let Some(node) = session
        .get_node(path)
        .await
        .map_err(|e| MigrateError::from_session(&describe(), path, e))?
    else {
        return Ok(None);
    };
    if node.is_ephemeral() {
        return Ok(Some((node, Vec::new())));
    }
    // A node deleted after its read simply has no children left to visit.
    let mut children = session
        .get_children(path)
        .await
        .map_err(|e| MigrateError::from_session(&describe(), path, e))?
        .unwrap_or_default();
    children.sort();
    Ok(Some((node, children)))
}

fn emit<W: Write>(
    writer: &mut StreamWriter<W>,
    record: NodeRecord,
    report: &mut ExportReport,
) -> MigrateResult<()> {
    debug!(path = %record.path, bytes = record.data.len(), ephemeral = record.ephemeral, "exported");
    writer.write_record(&record)?;
    report.records += 1;
    if record.ephemeral {
        report.ephemeral += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zkm_codec::{decode_stream, StreamHeader};
    use zkm_session::InMemoryTree;
    use zkm_types::open_acl_unsafe;

    fn paths_of(bytes: Vec<u8>) -> Vec<String> {
        decode_stream(&bytes[..])
            .unwrap()
            .map(|r| r.unwrap().path)
            .collect()
    }

    async fn export_with(tree: &Arc<InMemoryTree>, concurrency: usize, root: &str) -> (ExportReport, Vec<String>) {
        let session = tree.session(vec![], None);
        let mut writer = StreamWriter::new(Vec::new(), StreamHeader::new("mem", root)).unwrap();
        let report = TreeExporter::new(ExportOptions { concurrency })
            .export(&session, root, &mut writer)
            .await
            .unwrap();
        let (bytes, _) = writer.finish().unwrap();
        (report, paths_of(bytes))
    }

    fn sample() -> Arc<InMemoryTree> {
        let tree = Arc::new(InMemoryTree::new());
        for p in ["/b/x", "/a/z", "/a/y/deep", "/a-b", "/c"] {
            tree.put(p, b"v".to_vec(), open_acl_unsafe());
        }
        tree
    }

    #[tokio::test]
    async fn pre_order_with_sorted_children() {
        let (report, paths) = export_with(&sample(), 1, "/").await;
        assert_eq!(
            paths,
            vec!["/", "/a", "/a/y", "/a/y/deep", "/a/z", "/a-b", "/b", "/b/x", "/c"]
        );
        assert_eq!(report.records, 9);
        assert_eq!(report.vanished, 0);
    }

    #[tokio::test]
    async fn parallel_matches_sequential() {
        let tree = sample();
        let (_, sequential) = export_with(&tree, 1, "/").await;
        let (_, parallel) = export_with(&tree, 4, "/").await;
        assert_eq!(sequential, parallel);
    }

    #[tokio::test]
    async fn system_subtree_excluded() {
        let (_, paths) = export_with(&sample(), 1, "/").await;
        assert!(paths.iter().all(|p| !p.starts_with("/zookeeper")));
    }

    #[tokio::test]
    async fn subtree_export() {
        let (_, paths) = export_with(&sample(), 2, "/a").await;
        assert_eq!(paths, vec!["/a", "/a/y", "/a/y/deep", "/a/z"]);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let tree = sample();
        let session = tree.session(vec![], None);
        let mut writer = StreamWriter::new(Vec::new(), StreamHeader::new("mem", "/nope")).unwrap();
        for concurrency in [1, 3] {
            let err = TreeExporter::new(ExportOptions { concurrency })
                .export(&session, "/nope", &mut writer)
                .await
                .unwrap_err();
            assert!(matches!(err, MigrateError::MissingRoot { .. }));
        }
    }

    #[tokio::test]
    async fn zero_concurrency_rejected() {
        let tree = sample();
        let session = tree.session(vec![], None);
        let mut writer = StreamWriter::new(Vec::new(), StreamHeader::new("mem", "/")).unwrap();
        let err = TreeExporter::new(ExportOptions { concurrency: 0 })
            .export(&session, "/", &mut writer)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}

//! Document merge collaborator.
//!
//! `PdfMergeUtility` is a thin, request-scoped wrapper around `lopdf`: callers
//! register sources in order, point it at a destination writer and run
//! `merge`. Sources are loaded one at a time and released as soon as their
//! pages, bookmarks and form fields have been absorbed into the output.

use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::collections::BTreeSet;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Page attributes a page may inherit from its ancestors in the page tree.
/// They are copied onto each page before it is re-parented.
const INHERITABLE_ATTRIBUTES: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guards against cyclic Parent chains and name trees in malformed files
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no destination stream set for merge output")]
    NoDestination,

    #[error("failed to load source document '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: lopdf::Error,
    },

    #[error("malformed page tree in '{name}': {reason}")]
    PageTree { name: String, reason: String },

    #[error("failed to serialize merged document: {0}")]
    Serialize(#[source] io::Error),

    #[error("merge cache I/O failed: {0}")]
    Cache(#[source] io::Error),

    #[error("failed to write merged output: {0}")]
    Write(#[source] io::Error),
}

impl MergeError {
    /// True when the output side went away, e.g. the client disconnected.
    pub fn is_disconnect(&self) -> bool {
        let io_error = match self {
            MergeError::Write(e) | MergeError::Serialize(e) => Some(e),
            _ => None,
        };
        io_error.is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    }
}

/// One input document for a merge
#[derive(Debug, Clone)]
pub enum MergeSource {
    File { path: PathBuf, label: String },
    Buffer { bytes: Vec<u8>, label: String },
}

impl MergeSource {
    pub fn file(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        MergeSource::File {
            path: path.into(),
            label: label.into(),
        }
    }

    pub fn buffer(bytes: impl Into<Vec<u8>>, label: impl Into<String>) -> Self {
        MergeSource::Buffer {
            bytes: bytes.into(),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            MergeSource::File { label, .. } | MergeSource::Buffer { label, .. } => label,
        }
    }

    fn load(&self) -> Result<Document, MergeError> {
        let loaded = match self {
            MergeSource::File { path, .. } => Document::load(path),
            MergeSource::Buffer { bytes, .. } => Document::load_mem(bytes),
        };
        loaded.map_err(|source| MergeError::Load {
            name: self.label().to_string(),
            source,
        })
    }
}

impl From<&Path> for MergeSource {
    fn from(path: &Path) -> Self {
        MergeSource::file(path, path.display().to_string())
    }
}

/// Where serialized merge output lives before it reaches the destination
#[derive(Debug, Clone)]
pub enum MergeCache {
    /// Serialize into a scratch file in `dir`, drop the in-memory document,
    /// then copy the scratch file to the destination.
    ///
    /// The document graph is still fully in memory while it is serialized, so
    /// peak memory matches a direct write. What staging buys is ordering: any
    /// serialization failure happens before the first byte reaches the
    /// destination, and the graph is freed before the copy starts.
    Disk { dir: PathBuf },
}

impl MergeCache {
    pub fn disk(dir: impl Into<PathBuf>) -> Self {
        MergeCache::Disk { dir: dir.into() }
    }
}

/// Statistics about a merge operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Number of source documents loaded and released.
    pub documents: usize,

    /// Total number of pages in the merged document.
    pub pages: usize,

    /// Bytes written to the destination.
    pub bytes_written: u64,
}

/// Counts bytes on their way to the destination
struct CountingWriter<'a> {
    inner: &'a mut (dyn Write + Send),
    written: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Catalog-level structures collected across sources
#[derive(Debug, Default)]
struct CatalogParts {
    /// First and last top-level bookmark, chained in source order
    outline: Option<(ObjectId, ObjectId)>,
    outline_count: i64,
    /// First source's AcroForm entries (DA, DR, ...) without its Fields
    form: Option<Dictionary>,
    fields: Vec<Object>,
}

#[derive(Default)]
pub struct PdfMergeUtility {
    sources: Vec<MergeSource>,
    destination: Option<Box<dyn Write + Send>>,
    compress: bool,
}

impl PdfMergeUtility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress content streams of the merged document before writing it.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Appends a source; sources are merged in the order they were added.
    pub fn add_source(&mut self, source: impl Into<MergeSource>) {
        self.sources.push(source.into());
    }

    pub fn set_destination<W>(&mut self, destination: W)
    where
        W: Write + Send + 'static,
    {
        self.destination = Some(Box::new(destination));
    }

    /// Merges every source into one document and writes it to the destination.
    ///
    /// With `Some(cache)` the serialized output is staged on disk first, so
    /// nothing reaches the destination unless serialization succeeded. With
    /// `None` the document is serialized straight into it. The destination is
    /// flushed and dropped before this returns.
    pub fn merge(&mut self, cache: Option<&MergeCache>) -> Result<MergeSummary, MergeError> {
        let mut destination = self.destination.take().ok_or(MergeError::NoDestination)?;

        let (mut merged, documents) = self.assemble()?;
        let pages = merged.get_pages().len();

        let mut out = CountingWriter {
            inner: destination.as_mut(),
            written: 0,
        };

        match cache {
            Some(MergeCache::Disk { dir }) => {
                let mut scratch = tempfile::Builder::new()
                    .prefix(".merge-cache-")
                    .suffix(".pdf")
                    .tempfile_in(dir)
                    .map_err(MergeError::Cache)?;

                {
                    let mut writer = BufWriter::new(scratch.as_file_mut());
                    merged.save_to(&mut writer).map_err(MergeError::Serialize)?;
                    writer.flush().map_err(MergeError::Cache)?;
                }
                drop(merged);

                let file = scratch.as_file_mut();
                file.seek(SeekFrom::Start(0)).map_err(MergeError::Cache)?;
                io::copy(file, &mut out).map_err(MergeError::Write)?;
                // scratch is removed when it goes out of scope
            }
            None => {
                merged.save_to(&mut out).map_err(MergeError::Serialize)?;
            }
        }

        out.flush().map_err(MergeError::Write)?;

        Ok(MergeSummary {
            documents,
            pages,
            bytes_written: out.written,
        })
    }

    /// Builds the merged document in memory, absorbing one source at a time.
    fn assemble(&self) -> Result<(Document, usize), MergeError> {
        let mut merged = Document::with_version("1.5");
        let pages_id = merged.new_object_id();
        let outlines_id = merged.new_object_id();
        let mut kids: Vec<Object> = Vec::new();
        let mut parts = CatalogParts::default();

        for source in &self.sources {
            let document = source.load()?;
            debug!(
                "Loaded source '{}' ({} pages)",
                source.label(),
                document.get_pages().len()
            );

            if document.version > merged.version {
                merged.version = document.version.clone();
            }

            absorb(&mut merged, document, pages_id, outlines_id, &mut kids, &mut parts)
                .map_err(|reason| MergeError::PageTree {
                    name: source.label().to_string(),
                    reason,
                })?;
            debug!("Closed source '{}'", source.label());
        }

        let count = kids.len() as i64;
        merged.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };

        if let Some((first, last)) = parts.outline {
            merged.objects.insert(
                outlines_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Outlines",
                    "First" => first,
                    "Last" => last,
                    "Count" => parts.outline_count,
                }),
            );
            catalog.set("Outlines", outlines_id);
        }

        if !parts.fields.is_empty() {
            let mut form = parts.form.unwrap_or_default();
            form.set("Fields", parts.fields);
            catalog.set("AcroForm", form);
        }

        let catalog_id = merged.add_object(catalog);
        merged.trailer.set("Root", catalog_id);

        // Source catalogs, outline roots and page tree nodes are now unreachable
        merged.prune_objects();

        if self.compress {
            merged.compress();
        }

        Ok((merged, self.sources.len()))
    }
}

/// Moves every page of `source` under the merged page tree root, in order,
/// and collects its bookmarks and form fields into `parts`.
fn absorb(
    merged: &mut Document,
    mut source: Document,
    pages_id: ObjectId,
    outlines_id: ObjectId,
    kids: &mut Vec<Object>,
    parts: &mut CatalogParts,
) -> Result<(), String> {
    source.renumber_objects_with(merged.max_id + 1);
    merged.max_id = merged.max_id.max(source.max_id);

    // BTreeMap keyed by page number, so values come out in page order
    let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();

    for &page_id in &page_ids {
        let inherited = inherited_attributes(&source, page_id);
        let page = source
            .get_dictionary_mut(page_id)
            .map_err(|e| format!("page {:?} is not a dictionary: {}", page_id, e))?;

        for (key, value) in inherited {
            page.set(key, value);
        }
        page.set("Parent", Object::Reference(pages_id));
        kids.push(Object::Reference(page_id));
    }

    if let Ok(catalog) = source.catalog().cloned() {
        absorb_outline(merged, &mut source, &catalog, outlines_id, parts)?;
        absorb_form(&source, &catalog, parts);
    }

    merged.objects.extend(source.objects);
    Ok(())
}

/// Re-parents the source's top-level bookmarks under the merged outline root
/// and chains them after the bookmarks of earlier sources.
fn absorb_outline(
    merged: &mut Document,
    source: &mut Document,
    catalog: &Dictionary,
    outlines_id: ObjectId,
    parts: &mut CatalogParts,
) -> Result<(), String> {
    let view: &Document = source;
    let Some(root) = catalog
        .get(b"Outlines")
        .ok()
        .and_then(|o| resolve(view, o))
        .and_then(|o| o.as_dict().ok())
    else {
        return Ok(());
    };
    let Ok(first) = root.get(b"First").and_then(Object::as_reference) else {
        return Ok(());
    };
    let declared = root.get(b"Count").and_then(Object::as_i64).unwrap_or(0).abs();

    // Outline items may point at named destinations, which live in the source
    // catalog's name trees; those are not carried over, so pin them to pages.
    let mut updates = Vec::new();
    for item_id in outline_items(source, first) {
        if let Ok(item) = source.get_dictionary(item_id) {
            updates.extend(explicit_destinations(source, catalog, item_id, item));
        }
    }
    for (id, key, value) in updates {
        if let Ok(dict) = source.get_dictionary_mut(id) {
            dict.set(key, value);
        }
    }

    let top_level = sibling_chain(source, first);
    let Some(&last) = top_level.last() else {
        return Ok(());
    };
    for &item_id in &top_level {
        let item = source
            .get_dictionary_mut(item_id)
            .map_err(|e| format!("bookmark {:?} is not a dictionary: {}", item_id, e))?;
        item.set("Parent", Object::Reference(outlines_id));
    }
    // A Next beyond the chain we walked would point at a pruned object
    if let Ok(item) = source.get_dictionary_mut(last) {
        item.remove(b"Next");
    }

    match parts.outline {
        Some((head, tail)) => {
            if let Ok(previous) = merged.get_dictionary_mut(tail) {
                previous.set("Next", Object::Reference(first));
            }
            if let Ok(item) = source.get_dictionary_mut(first) {
                item.set("Prev", Object::Reference(tail));
            }
            parts.outline = Some((head, last));
        }
        None => {
            if let Ok(item) = source.get_dictionary_mut(first) {
                item.remove(b"Prev");
            }
            parts.outline = Some((first, last));
        }
    }
    parts.outline_count += declared.max(top_level.len() as i64);

    Ok(())
}

/// Appends the source's top-level form fields; the first form found supplies
/// the shared entries such as default appearance and resources.
fn absorb_form(source: &Document, catalog: &Dictionary, parts: &mut CatalogParts) {
    let Some(form) = catalog
        .get(b"AcroForm")
        .ok()
        .and_then(|o| resolve(source, o))
        .and_then(|o| o.as_dict().ok())
    else {
        return;
    };

    if let Some(Object::Array(fields)) = form.get(b"Fields").ok().and_then(|o| resolve(source, o)) {
        parts.fields.extend(fields.iter().cloned());
    }

    if parts.form.is_none() {
        let mut shared = form.clone();
        shared.remove(b"Fields");
        parts.form = Some(shared);
    }
}

/// Follows one level of indirection
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Items reachable from `first` through Next, without revisiting any
fn sibling_chain(doc: &Document, first: ObjectId) -> Vec<ObjectId> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = Some(first);

    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        chain.push(id);
        current = doc
            .get_dictionary(id)
            .and_then(|item| item.get(b"Next"))
            .and_then(Object::as_reference)
            .ok();
    }

    chain
}

/// Every outline item at any depth below and including the `first` chain
fn outline_items(doc: &Document, first: ObjectId) -> Vec<ObjectId> {
    let mut items = Vec::new();
    let mut seen = BTreeSet::new();
    let mut pending = vec![first];

    while let Some(head) = pending.pop() {
        for id in sibling_chain(doc, head) {
            if !seen.insert(id) {
                continue;
            }
            items.push(id);
            if let Ok(child) = doc
                .get_dictionary(id)
                .and_then(|item| item.get(b"First"))
                .and_then(Object::as_reference)
            {
                pending.push(child);
            }
        }
    }

    items
}

/// Name of a named destination, if `object` is one
fn destination_name(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Name(name) | Object::String(name, _) => Some(name.as_slice()),
        _ => None,
    }
}

/// Rewrites for an outline item whose Dest, or GoTo action, names a destination.
fn explicit_destinations(
    doc: &Document,
    catalog: &Dictionary,
    item_id: ObjectId,
    item: &Dictionary,
) -> Vec<(ObjectId, &'static str, Object)> {
    let mut updates = Vec::new();

    if let Some(name) = item.get(b"Dest").ok().and_then(destination_name) {
        if let Some(dest) = named_destination(doc, catalog, name) {
            updates.push((item_id, "Dest", dest));
        }
    }

    let Ok(action_object) = item.get(b"A") else {
        return updates;
    };
    let Some(action) = resolve(doc, action_object).and_then(|o| o.as_dict().ok()) else {
        return updates;
    };
    let is_goto = action
        .get(b"S")
        .and_then(Object::as_name)
        .is_ok_and(|s| s == b"GoTo");
    let target = action.get(b"D").ok().and_then(destination_name);

    if let (true, Some(name)) = (is_goto, target) {
        if let Some(dest) = named_destination(doc, catalog, name) {
            match action_object {
                Object::Reference(action_id) => updates.push((*action_id, "D", dest)),
                _ => {
                    let mut inline = action.clone();
                    inline.set("D", dest);
                    updates.push((item_id, "A", Object::Dictionary(inline)));
                }
            }
        }
    }

    updates
}

/// Looks `name` up in the catalog's Dests dictionary, then in the Dests name tree.
fn named_destination(doc: &Document, catalog: &Dictionary, name: &[u8]) -> Option<Object> {
    let from_dests = catalog
        .get(b"Dests")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .and_then(|dests| dests.get(name).ok());

    let value = match from_dests {
        Some(value) => value,
        None => {
            let tree = catalog
                .get(b"Names")
                .ok()
                .and_then(|o| resolve(doc, o))
                .and_then(|o| o.as_dict().ok())?
                .get(b"Dests")
                .ok()
                .and_then(|o| resolve(doc, o))
                .and_then(|o| o.as_dict().ok())?;
            lookup_name_tree(doc, tree, name, 0)?
        }
    };

    // A destination is either the array itself or a dictionary holding it in D
    match resolve(doc, value)? {
        Object::Dictionary(dict) => dict.get(b"D").ok().and_then(|d| resolve(doc, d)).cloned(),
        other => Some(other.clone()),
    }
}

fn lookup_name_tree<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    name: &[u8],
    depth: usize,
) -> Option<&'a Object> {
    if depth >= MAX_TREE_DEPTH {
        return None;
    }

    if let Some(Object::Array(entries)) = node.get(b"Names").ok().and_then(|o| resolve(doc, o)) {
        for pair in entries.chunks(2) {
            if let [key, value] = pair {
                if destination_name(key) == Some(name) {
                    return Some(value);
                }
            }
        }
    }

    if let Some(Object::Array(children)) = node.get(b"Kids").ok().and_then(|o| resolve(doc, o)) {
        for child in children {
            let found = resolve(doc, child)
                .and_then(|o| o.as_dict().ok())
                .and_then(|kid| lookup_name_tree(doc, kid, name, depth + 1));
            if found.is_some() {
                return found;
            }
        }
    }

    None
}

/// Collects inheritable attributes a page lacks from its nearest ancestor.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut missing: Vec<&[u8]> = INHERITABLE_ATTRIBUTES
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut found = Vec::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;

    while let Some(node_id) = parent {
        if missing.is_empty() || depth >= MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };

        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });

        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    found
}

//! Partition oracle backed by an external community-detection program.
//!
//! Each call writes the thresholded similarity graph as GEXF, runs
//! `<program> [args..] <graph file> <output file>` inside the working
//! directory and reads back a CSV with `label` and `modularity_class`
//! columns (the node table export of common graph toolkits).

use std::{
    fmt::Display,
    fs,
    hash::Hash,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use ahash::RandomState;
use indexmap::IndexMap;
use tracing::debug;

use crate::{
    community::oracle::{Partition, PartitionOracle, PartitionRequest, WeightedGraph},
    error::OracleError,
};

#[derive(Debug)]
pub struct CommandOracle {
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
    timeout: Option<Duration>,
    poll_interval: Duration,
    keep_files: bool,
    seq: AtomicUsize,
}

impl CommandOracle {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            timeout: None,
            poll_interval: Duration::from_millis(50),
            keep_files: false,
            seq: AtomicUsize::new(0),
        }
    }

    /// Arguments placed before the graph/output paths
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Keep the graph and output files after the call
    pub fn keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    fn file_stem(&self, parent: Option<usize>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        match parent {
            Some(label) => format!("{label}_cluster_{seq}"),
            None => format!("root_cluster_{seq}"),
        }
    }

    /// Run the program and wait, killing it on timeout
    fn execute(&self, graph_path: &Path, out_path: &Path) -> Result<(), OracleError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(graph_path)
            .arg(out_path)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| OracleError::Unreachable(format!("{}: {e}", self.program.display())))?;

        let started = Instant::now();
        loop {
            let status = child.try_wait().map_err(|e| OracleError::Failed(e.to_string()))?;
            if let Some(status) = status {
                if status.success() {
                    return Ok(());
                }
                return Err(OracleError::Failed(format!("{} exited with {status}", self.program.display())));
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    // kill 失敗は既に終了しているケースなので無視
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(OracleError::Timeout(limit));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl<K> PartitionOracle<K> for CommandOracle
where
    K: Clone + Eq + Hash + Display,
{
    fn partition(&self, request: &PartitionRequest<'_, K>) -> Result<Partition<K>, OracleError> {
        let stem = self.file_stem(request.parent);
        let graph_path = self.work_dir.join(format!("{stem}.gexf"));
        let out_path = self.work_dir.join(format!("{stem}.csv"));

        let graph = request.graph();
        debug!(
            nodes = graph.nodes,
            edges = graph.edges.len(),
            path = %graph_path.display(),
            "writing partition graph"
        );
        write_gexf(&graph_path, request.ids, &graph)?;

        let result = self
            .execute(&graph_path, &out_path)
            .and_then(|_| read_partition(&out_path, request.ids));

        if !self.keep_files {
            let _ = fs::remove_file(&graph_path);
            let _ = fs::remove_file(&out_path);
        }
        result
    }
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Undirected GEXF 1.2 graph, node ids are matrix indices
pub fn write_gexf<K: Display>(path: &Path, ids: &[K], graph: &WeightedGraph) -> Result<(), OracleError> {
    let io_err = |source| OracleError::Io { path: path.to_path_buf(), source };
    let file = fs::File::create(path).map_err(io_err)?;
    let mut w = BufWriter::new(file);
    let write = |w: &mut BufWriter<fs::File>| -> std::io::Result<()> {
        writeln!(w, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(w, r#"<gexf xmlns="http://www.gexf.net/1.2draft" version="1.2">"#)?;
        writeln!(w, r#"<graph defaultedgetype="undirected" idtype="string" mode="static">"#)?;
        writeln!(w, r#"<nodes count="{}">"#, ids.len())?;
        for (i, id) in ids.iter().enumerate() {
            writeln!(w, r#"<node id="{i}" label="{}"/>"#, escape_xml(&id.to_string()))?;
        }
        writeln!(w, "</nodes>")?;
        writeln!(w, r#"<edges count="{}">"#, graph.edges.len())?;
        for (n, e) in graph.edges.iter().enumerate() {
            writeln!(w, r#"<edge id="{n}" source="{}" target="{}" weight="{}"/>"#, e.source, e.target, e.weight)?;
        }
        writeln!(w, "</edges>")?;
        writeln!(w, "</graph>")?;
        writeln!(w, "</gexf>")?;
        w.flush()
    };
    write(&mut w).map_err(io_err)
}

/// Split CSV text into records, honouring double-quoted fields.
/// Quoted fields may contain commas, doubled quotes and line breaks.
/// Blank lines are skipped.
fn csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => record.push(std::mem::take(&mut field)),
            '\r' if !quoted && chars.peek() == Some(&'\n') => {}
            '\n' if !quoted => {
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    record.push(field);
    push_record(&mut records, record);
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    let blank = record.len() == 1 && record[0].trim().is_empty();
    if !blank {
        records.push(record);
    }
}

/// Read `label,modularity_class` rows and map them back onto `ids`
pub fn read_partition<K>(path: &Path, ids: &[K]) -> Result<Partition<K>, OracleError>
where
    K: Clone + Eq + Hash + Display,
{
    let content = fs::read_to_string(path).map_err(|source| OracleError::Io { path: path.to_path_buf(), source })?;
    let mut records = csv_records(content.trim_start_matches('\u{feff}')).into_iter();
    let header = records
        .next()
        .ok_or_else(|| OracleError::Malformed(format!("{} is empty", path.display())))?;
    let columns: Vec<String> = header.into_iter().map(|c| c.trim().to_ascii_lowercase()).collect();
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| OracleError::Malformed(format!("missing column '{name}'")))
    };
    let label_col = column("label")?;
    let class_col = column("modularity_class")?;

    let by_name: IndexMap<String, &K, RandomState> = ids.iter().map(|k| (k.to_string(), k)).collect();
    let mut out = Partition::default();
    for fields in records {
        let (Some(name), Some(class)) = (fields.get(label_col), fields.get(class_col)) else {
            return Err(OracleError::Malformed(format!("short row: {}", fields.join(","))));
        };
        let key = by_name
            .get(name.trim())
            .ok_or_else(|| OracleError::Malformed(format!("unknown document '{name}'")))?;
        let class: usize = class
            .trim()
            .parse()
            .map_err(|_| OracleError::Malformed(format!("bad modularity_class '{class}'")))?;
        out.insert((*key).clone(), class);
    }
    Ok(out)
}

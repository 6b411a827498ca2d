#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Database location inside a not-yet-existing subdirectory.
    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("state").join("sqlmate.db")
    }
}

/// `name,email,amount` with `rows` data lines.
pub fn sales_csv(rows: usize) -> String {
    let mut csv = String::from("name,email,amount\n");
    for i in 0..rows {
        csv.push_str(&format!("Person {i},person{i}@example.com,{}\n", (i + 1) * 100));
    }
    csv
}

/// Orders reference sellers through `seller_id`.
pub fn orders_csv() -> &'static str {
    "order_no,seller_id,total\n1001,1,250\n1002,2,75\n1003,1,40\n"
}

pub fn sellers_csv() -> &'static str {
    "seller_id,seller_region\n1,Seoul\n2,Busan\n"
}

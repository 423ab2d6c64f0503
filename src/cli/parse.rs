use crate::core::artifacts::ArtifactStore;
use crate::core::models::LocationCode;
use crate::parser::{CsvStatusParser, ParseReport, StatusParser};
use anyhow::Result;
use std::path::Path;

pub fn run(code: &str, data_dir: &Path) -> Result<()> {
    let code = LocationCode::parse(code)?;
    let store = ArtifactStore::new(data_dir);

    if !store.has_location(&code) {
        anyhow::bail!(
            "No location data for {} in {}",
            code,
            data_dir.display()
        );
    }

    let report = CsvStatusParser::new().parse_and_cleanup(&code, &store)?;
    print!("{}", render(&code, &report));
    Ok(())
}

fn render(code: &LocationCode, report: &ParseReport) -> String {
    if report.status_files == 0 {
        return format!("{code}: no status files to parse\n");
    }

    let mut out = format!(
        "{code}: {} rows from {} status files ({} removed)\n",
        report.rows, report.status_files, report.removed
    );
    for (status, count) in &report.statuses {
        out.push_str(&format!("  {status:?}: {count}\n"));
    }
    out
}

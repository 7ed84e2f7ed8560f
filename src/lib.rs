#![allow(non_snake_case)]

pub mod error;
pub mod params;

pub mod align;
pub mod genome;
pub mod index;
pub mod io;
pub mod repeat;

use log::info;

use crate::params::{Parameters, RunMode};

/// Top-level dispatcher. Called from `main()` after CLI parsing.
pub fn run(params: &Parameters) -> anyhow::Result<()> {
    params.validate()?;

    info!("ruHISAT v{}", env!("CARGO_PKG_VERSION"));
    info!("runMode: {}", params.run_mode);

    match params.run_mode {
        RunMode::RepeatBuild => repeat_build(params),
        RunMode::AlignReads => align_reads(params),
    }
}

fn repeat_build(params: &Parameters) -> anyhow::Result<()> {
    use crate::index::GenomeIndex;
    use crate::repeat::builder::RepeatBuilder;

    info!(
        "genomeFastaFiles: {:?}",
        params
            .genome_fasta_files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
    );

    info!("Building genome index...");
    let index = GenomeIndex::build(params)?;

    info!("Writing index files to {}...", params.genome_dir.display());
    index.write(&params.genome_dir)?;

    let rp = params.repeat_parameters();
    let prefix = params.out_file_name_prefix.display().to_string();

    info!(
        "Building repeat database ({}-{} bp, count >= {})...",
        rp.min_repeat_len, rp.max_repeat_len, rp.repeat_count
    );
    let mut builder = RepeatBuilder::new(&index.genome, prefix);
    builder.read_suffix_array(&rp, &index.suffix_array);
    builder.build(&rp)?;
    builder.save(&rp)?;

    info!("Repeat database complete!");
    Ok(())
}

fn align_reads(params: &Parameters) -> anyhow::Result<()> {
    info!("genomeDir: {}", params.genome_dir.display());
    info!(
        "readFilesIn: {:?}",
        params
            .read_files_in
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
    );

    let stats = align::read_align::align_read_files(params)?;
    info!(
        "Alignment complete: {} reads, {} aligned, {} alignments reported",
        stats.reads, stats.aligned_reads, stats.alignments
    );
    Ok(())
}

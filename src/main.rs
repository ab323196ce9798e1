use classweave::jvm::analysis::ComputeMode;
use classweave::jvm::*;

use clap::{Arg, ArgAction, Command};
use std::fs;

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("classweave")
        .version(clap::crate_version!())
        .about("Read a JVM class file and write it back out with recomputed stack sizes and frames")
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("FILE")
                .required(false)
                .help("Where to write the rewritten class (defaults to overwriting the input)"),
        )
        .arg(
            Arg::new("compute")
                .long("compute")
                .value_name("MODE")
                .value_parser(["maxs", "frames"])
                .default_value("frames")
                .help("Recompute only `max_stack`/`max_locals`, or the `StackMapTable` too"),
        )
        .arg(
            Arg::new("trace")
                .long("trace")
                .action(ArgAction::SetTrue)
                .help("Print the events read from the input class"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Sets the input class file to use")
                .required(true)
                .index(1),
        )
        .get_matches();

    let compute = match matches.get_one::<String>("compute").map(String::as_str) {
        Some("maxs") => ComputeMode::MaxStack,
        _ => ComputeMode::Frames,
    };

    let class_file = matches
        .get_one::<String>("INPUT")
        .expect("`INPUT` is required");
    log::info!("Reading '{}'", class_file);
    let class_bytes = fs::read(class_file)?;
    let reader = ClassReader::new(&class_bytes)?;

    if matches.get_flag("trace") {
        let mut tracer = Tracer::new();
        reader.accept(&mut tracer)?;
        print!("{}", tracer);
    }

    let mut writer = ClassWriter::from_reader(&reader, WriterOptions::new(compute))?;
    reader.accept(&mut writer)?;
    let rewritten = writer.to_bytes()?;

    let output_file = matches
        .get_one::<String>("output")
        .unwrap_or(class_file);
    log::info!(
        "Writing '{}' ({} bytes, {} constant pool slots)",
        output_file,
        rewritten.len(),
        writer.constants().count()
    );
    fs::write(output_file, rewritten)?;

    Ok(())
}

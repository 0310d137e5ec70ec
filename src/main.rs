use clap::Parser;
use log::info;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use macchiato::class::ClassFile;
use macchiato::pool::ConstantPool;
use macchiato::program::Program;
use macchiato::runtime::Runtime;

/// Executes the main method of a compiled Java class file.
#[derive(Parser)]
#[command(name = "macchiato", version, about)]
struct Args {
    /// Path to the .class file to execute.
    class_file: PathBuf,
    /// Print the parsed structures before execution.
    #[arg(short, long)]
    dump: bool,
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let args = Args::parse();
    let bytes = match fs::read(&args.class_file) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", args.class_file.display());
            return ExitCode::FAILURE;
        }
    };
    let class = match ClassFile::parse(&bytes) {
        Ok(class) => class,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if args.dump {
        dump(&class);
    }
    let program = match Program::new(&class) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("executing {}", args.class_file.display());
    let mut runtime = Runtime::new(program);
    match runtime.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Prints the parsed class structures the way javap sketches them.
fn dump(class: &ClassFile) {
    println!("magic: {:#010X}", class.magic);
    println!("version: {}.{}", class.major_version, class.minor_version);
    println!("constant pool ({} slots):", class.pool.count());
    dump_pool(&class.pool);
    println!("access flags: {:#06X}", class.access_flags);
    if let Ok(name) = class.class_name() {
        println!("this class: {name}");
    }
    println!("interfaces: {:?}", class.interfaces);
    println!("fields ({}):", class.fields.len());
    for field in &class.fields {
        let name = class.pool.name_by_index(field.name_index);
        let descriptor = class.pool.name_by_index(field.descriptor_index);
        println!(
            "  {} {} (flags {:#06X})",
            descriptor.unwrap_or_default(),
            name.unwrap_or_default(),
            field.access_flags
        );
    }
    println!("methods ({}):", class.methods.len());
    for method in &class.methods {
        let name = class.pool.name_by_index(method.name_index);
        let descriptor = class.pool.name_by_index(method.descriptor_index);
        println!(
            "  {}{} (flags {:#06X})",
            name.unwrap_or_default(),
            descriptor.unwrap_or_default(),
            method.access_flags
        );
        if let Some(code) = method.code() {
            println!(
                "    code: {} bytes, max_stack {}, max_locals {}",
                code.code.len(),
                code.max_stack,
                code.max_locals
            );
        }
    }
    println!("class attributes: {}", class.attributes.len());
}

fn dump_pool(pool: &ConstantPool) {
    for index in 1..pool.count() {
        match pool.name_by_index(index) {
            Ok(name) => println!("  #{index} = {name}"),
            Err(_) => println!("  #{index} = <{}>", pool_kind(pool, index)),
        }
    }
}

fn pool_kind(pool: &ConstantPool, index: u16) -> &'static str {
    pool.entry(index).map_or("invalid", |entry| entry.kind())
}

//! Command-line interface for xsdstream

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};

#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use xsdstream::validators::components::TypeDef;
#[cfg(feature = "cli")]
use xsdstream::validators::Builtin;
#[cfg(feature = "cli")]
use xsdstream::{compile_from, Error, FileResolver, Options, RuntimeOptions, Schema, SchemaLocationPolicy};

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "xsdstream")]
#[command(author, version, about = "Streaming XML Schema validator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    /// Apply hints on the root element
    Root,
    /// Scan the whole document for hints
    Document,
    /// Ignore hints
    Ignore,
}

#[cfg(feature = "cli")]
impl From<Policy> for SchemaLocationPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Root => SchemaLocationPolicy::RootOnly,
            Policy::Document => SchemaLocationPolicy::Document,
            Policy::Ignore => SchemaLocationPolicy::Ignore,
        }
    }
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate XML documents against an XSD schema
    Validate {
        /// Path to the XSD schema file
        #[arg(short, long, value_name = "SCHEMA")]
        schema: PathBuf,

        /// XML files to validate
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Print violations as JSON
        #[arg(short, long)]
        json: bool,

        /// How xsi:schemaLocation hints are handled
        #[arg(long, value_enum, default_value = "root")]
        policy: Policy,

        /// Stop recording after this many violations per document
        #[arg(long, default_value_t = 0)]
        max_violations: usize,
    },

    /// Compile a schema and list its global components
    Inspect {
        /// Path to the XSD schema file
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,
    },
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            schema,
            files,
            json,
            policy,
            max_violations,
        } => {
            let runtime = RuntimeOptions::new()
                .with_schema_location_policy(policy.into())
                .with_max_violations(max_violations);
            cmd_validate(schema, files, json, runtime)
        }
        Commands::Inspect { schema } => cmd_inspect(schema),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

#[cfg(feature = "cli")]
fn load(path: &PathBuf, runtime: RuntimeOptions) -> Result<Schema, Error> {
    let options = Options::new().with_runtime(runtime);
    compile_from(FileResolver::new(), &path.to_string_lossy(), options)
}

#[cfg(feature = "cli")]
fn report_compile_error(error: &Error) {
    match error.violations() {
        Some(list) => {
            for violation in list {
                eprintln!("{}", violation);
            }
        }
        None => eprintln!("Error: {}", error),
    }
}

#[cfg(feature = "cli")]
fn cmd_validate(schema_path: PathBuf, files: Vec<PathBuf>, json: bool, runtime: RuntimeOptions) -> Result<bool, Error> {
    let schema = match load(&schema_path, runtime) {
        Ok(schema) => schema,
        Err(e) => {
            report_compile_error(&e);
            return Err(e);
        }
    };

    let mut valid = true;
    for file in &files {
        let violations = schema.validate_file(file);
        if !violations.is_empty() {
            valid = false;
        }
        if json {
            println!("{}", violations.to_json());
        } else if violations.is_empty() {
            println!("{}: valid", file.display());
        } else {
            println!("{}: {} violation(s)", file.display(), violations.len());
            for violation in &violations {
                println!("  {}", violation);
            }
            if violations.truncated() {
                println!("  (further violations not recorded)");
            }
        }
    }
    Ok(valid)
}

#[cfg(feature = "cli")]
fn cmd_inspect(schema_path: PathBuf) -> Result<bool, Error> {
    let schema = match load(&schema_path, RuntimeOptions::new()) {
        Ok(schema) => schema,
        Err(e) => {
            report_compile_error(&e);
            return Err(e);
        }
    };
    let set = schema.components();

    println!("=== Global Elements ===");
    for (name, id) in &set.element_names {
        let decl = set.element(*id);
        let type_name = decl
            .type_ref
            .id()
            .map(|t| set.type_name(t))
            .unwrap_or_else(|| "anyType".to_string());
        println!("  {} : {}", name, type_name);
    }

    println!("\n=== Global Types ===");
    for (name, id) in set.type_names.iter().filter(|(_, id)| id.0 >= Builtin::ALL.len()) {
        let kind = match set.type_def(*id) {
            TypeDef::Complex(_) => "complex",
            _ => "simple",
        };
        println!("  {} ({})", name, kind);
    }

    println!("\n=== Global Attributes ===");
    for name in set.attribute_names.keys() {
        println!("  {}", name);
    }

    println!("\n{} content automaton state(s)", schema.compiled().state_count());
    Ok(true)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(1);
}

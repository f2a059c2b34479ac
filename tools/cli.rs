use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use ocra::{HighlightedCode, HtmlRenderer, Registry, Token};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// Indented token tree with spans and scopes
    Tree,
    /// The top-level tokens as JSON
    Json,
    /// Highlighted HTML with one span per scope
    Html,
}

#[derive(Parser)]
#[command(name = "ocra-cli")]
#[command(about = "Tokenize a file with one of the bundled grammars")]
struct Args {
    /// Grammar name or alias, detected from the content when absent
    #[arg(short, long)]
    lang: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Format::Tree)]
    format: Format,

    /// Extra JSON grammar files to register before tokenizing
    #[arg(short, long = "grammar")]
    grammars: Vec<PathBuf>,

    /// File to read, stdin when absent
    file: Option<PathBuf>,
}

fn print_tree(tokens: &[Token], source: &str, depth: usize) {
    for token in tokens {
        let scope = token
            .scope
            .map(|s| s.build_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}{}..{} {} {:?}",
            "  ".repeat(depth),
            token.span.start,
            token.span.end,
            scope,
            token.text(source)
        );
        print_tree(&token.children, source, depth + 1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::with_builtin_grammars()?;
    for path in &args.grammars {
        registry.add_grammar_from_path(path)?;
    }

    let source = match &args.file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let lang = match args.lang {
        Some(lang) => lang,
        None => registry
            .detect_language(&source)
            .ok_or("could not detect the language, use --lang")?,
    };
    let highlighted: HighlightedCode = registry.highlight(&lang, &source)?;

    match args.format {
        Format::Tree => {
            println!(
                "# {} (relevance {})",
                highlighted.language, highlighted.relevance
            );
            print_tree(&highlighted.tokens, &source, 0);
        }
        Format::Json => println!("{}", serde_json::to_string_pretty(&highlighted.tokens)?),
        Format::Html => println!("{}", HtmlRenderer::default().render(&highlighted)),
    }

    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

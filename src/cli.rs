use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ziparc")]
#[command(version)]
#[command(about = "List, test, extract and update ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  ziparc data1.zip -x joe             extract all files except joe from data1.zip\n  \
  ziparc -p foo.zip | more            send contents of foo.zip via pipe into more\n  \
  ziparc -P 111111 -a notes.txt a.zip add notes.txt to a.zip, encrypted\n  \
  ziparc -t a.zip                     verify every entry's CRC")]
pub struct Cli {
    /// ZIP archive path
    #[arg(value_name = "ARCHIVE")]
    pub file: String,

    /// Entries to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely, with permissions and compression
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive data (decompress and check CRCs)
    #[arg(short = 't')]
    pub test: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Password for encrypted entries, used for reading and adding
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Add files or directories (with their contents) to the archive
    #[arg(short = 'a', value_name = "FILE", num_args = 1..)]
    pub add: Vec<String>,

    /// When adding, append duplicates instead of replacing same-named entries
    #[arg(short = 'D', requires = "add")]
    pub keep_duplicates: bool,

    /// Store added files without compression
    #[arg(short = 's', requires = "add")]
    pub store: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    /// Whether the positional and `-x` filters select `name`.
    pub fn selects(&self, name: &str) -> bool {
        let included = self.files.is_empty()
            || self.files.iter().any(|f| {
                if has_glob_chars(f) {
                    glob_match(f, name)
                } else {
                    // No wildcards: exact match on the full name or its last component
                    let basename = name.trim_end_matches('/').rsplit('/').next().unwrap_or(name);
                    name == f || basename == f
                }
            });
        included && !self.exclude.iter().any(|x| name.contains(x.as_str()) || glob_match(x, name))
    }

    pub fn has_filters(&self) -> bool {
        !self.files.is_empty() || !self.exclude.is_empty()
    }
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Skip the star, or let it swallow one more character
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

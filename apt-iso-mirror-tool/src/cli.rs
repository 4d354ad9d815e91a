// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apt_iso_mirror::{
        builder::MirrorBuilder,
        error::MirrorError,
        signer::{create_signing_key, PgpSigner},
        BuildEvent,
    },
    clap::{Arg, ArgMatches, Command},
    std::{
        io::Write,
        path::PathBuf,
    },
    thiserror::Error,
};

const BUILD_ABOUT: &str = "\
Build an apt mirror from Debian installation image trees.

Each SOURCE is the root of a mounted installation image, containing
`dists` and `pool` sub-directories. Mount the images first, e.g. with
fuseiso or `mount -o loop`, and unmount them after the build completes.

Sources are merged in the order given into `TARGET/debian/<version>/`,
where the version is read from the first source's Release file. Package
indices contributed by multiple images are concatenated, not
overwritten, so the order of SOURCE arguments determines the order of
entries in the merged `Packages` files.

After merging, the suite's Release file is regenerated with fresh
checksum tables and signed with the given key, producing `Release.gpg`,
`InRelease`, and an exported `KEY.gpg` next to it. Point apt at the
mirror and install `KEY.gpg` into the client keyring to use it.
";

const RESIGN_ABOUT: &str = "\
Regenerate and re-sign the metadata of an existing mirror.

No merging occurs. The suite to re-sign is located by searching TARGET
for a `Release.gpg` under `<version>/dists/<suite>/`, then its Release
file's checksum tables are recomputed from the tree's current state and
fresh signatures are written.

Use this after touching files under an already-built mirror, or to
re-sign with a different key.
";

const GENERATE_KEY_ABOUT: &str = "\
Generate a self-signed PGP key pair for signing mirrors.

Writes an ASCII armored secret key and public key to the given paths.
The secret key is what `build` and `resign` consume via --signing-key.

A self-signed key is sufficient for a private mirror whose clients
install the exported KEY.gpg directly; keys participating in a wider
web of trust should be provisioned with dedicated PGP tooling instead.
";

#[derive(Debug, Error)]
pub enum AimError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0:?}")]
    Mirror(#[from] MirrorError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, AimError>;

fn signing_key_arg() -> Arg<'static> {
    Arg::new("signing-key")
        .long("--signing-key")
        .takes_value(true)
        .required(true)
        .allow_invalid_utf8(true)
        .help("Path to an ASCII armored PGP secret key used for signing")
}

fn key_passphrase_arg() -> Arg<'static> {
    Arg::new("key-passphrase")
        .long("--key-passphrase")
        .takes_value(true)
        .default_value("")
        .help("Passphrase unlocking the signing key, if any")
}

pub fn run_cli() -> Result<()> {
    let app = Command::new("apt ISO mirror")
        .version("0.1")
        .about("Build apt mirrors from Debian installation images")
        .arg_required_else_help(true);

    let app = app.subcommand(
        Command::new("build")
            .about("Merge installation image trees into an apt mirror")
            .long_about(BUILD_ABOUT)
            .arg(signing_key_arg())
            .arg(key_passphrase_arg())
            .arg(
                Arg::new("target")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to build the mirror under"),
            )
            .arg(
                Arg::new("sources")
                    .takes_value(true)
                    .required(true)
                    .multiple_values(true)
                    .allow_invalid_utf8(true)
                    .help("Mounted installation image roots, in merge order"),
            ),
    );

    let app = app.subcommand(
        Command::new("resign")
            .about("Regenerate and re-sign an existing mirror's metadata")
            .long_about(RESIGN_ABOUT)
            .arg(signing_key_arg())
            .arg(key_passphrase_arg())
            .arg(
                Arg::new("release-version")
                    .long("--release-version")
                    .takes_value(true)
                    .required(true)
                    .help("Version directory whose suite to re-sign, e.g. 11.1"),
            )
            .arg(
                Arg::new("target")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Directory containing the existing mirror"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("generate-key")
            .about("Generate a self-signed PGP signing key pair")
            .long_about(GENERATE_KEY_ABOUT)
            .arg(key_passphrase_arg())
            .arg(
                Arg::new("user-id")
                    .long("--user-id")
                    .takes_value(true)
                    .required(true)
                    .help("Primary user id of the key, e.g. 'Name <email>'"),
            )
            .arg(
                Arg::new("secret-key")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to write the armored secret key to"),
            )
            .arg(
                Arg::new("public-key")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to write the armored public key to"),
            ),
    );

    let matches = app.clone().get_matches();

    match matches.subcommand() {
        Some(("build", args)) => command_build(args),
        Some(("resign", args)) => command_resign(args),
        Some(("generate-key", args)) => command_generate_key(args),
        Some((command, _)) => Err(AimError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn load_signer(args: &ArgMatches) -> Result<PgpSigner> {
    let key_path = PathBuf::from(
        args.value_of_os("signing-key")
            .expect("signing-key argument is required"),
    );
    let passphrase = args
        .value_of("key-passphrase")
        .expect("key-passphrase has a default");

    Ok(PgpSigner::from_armored_file(&key_path, passphrase)?)
}

/// Render build events on a single overwritten terminal line, the way
/// long file walks are traditionally displayed, with milestone events
/// promoted to their own lines.
fn progress_callback() -> Option<impl Fn(BuildEvent)> {
    Some(|event: BuildEvent| {
        match event {
            BuildEvent::DistsEntry(_)
            | BuildEvent::PoolEntry(_)
            | BuildEvent::ChecksumEntry(_)
            | BuildEvent::IndexMerged(_) => {
                print!("\x1b[2K\r> {}", event);
                std::io::stdout().flush().ok();
            }
            event => {
                println!("\x1b[2K\r> {}", event);
            }
        };
    })
}

fn command_build(args: &ArgMatches) -> Result<()> {
    let target = PathBuf::from(args.value_of_os("target").expect("target argument is required"));
    let sources = args
        .values_of_os("sources")
        .expect("sources argument is required")
        .map(PathBuf::from)
        .collect::<Vec<_>>();

    let signer = load_signer(args)?;
    let progress_cb = progress_callback();

    let dest = MirrorBuilder::new(&signer, &progress_cb).build(&sources, &target)?;

    println!("\x1b[2K\r> mirror written to {}", dest.display());

    Ok(())
}

fn command_resign(args: &ArgMatches) -> Result<()> {
    let target = PathBuf::from(args.value_of_os("target").expect("target argument is required"));
    let version = args
        .value_of("release-version")
        .expect("release-version argument is required");

    let signer = load_signer(args)?;
    let progress_cb = progress_callback();

    MirrorBuilder::new(&signer, &progress_cb).resign(&target, version)?;

    println!("\x1b[2K\r> re-signed version {} under {}", version, target.display());

    Ok(())
}

fn command_generate_key(args: &ArgMatches) -> Result<()> {
    let user_id = args.value_of("user-id").expect("user-id argument is required");
    let passphrase = args
        .value_of("key-passphrase")
        .expect("key-passphrase has a default")
        .to_string();
    let secret_path = PathBuf::from(
        args.value_of_os("secret-key")
            .expect("secret-key argument is required"),
    );
    let public_path = PathBuf::from(
        args.value_of_os("public-key")
            .expect("public-key argument is required"),
    );

    let (secret, public) = create_signing_key(user_id, move || passphrase)?;

    std::fs::write(
        &secret_path,
        secret
            .to_armored_string(None)
            .map_err(MirrorError::from)?,
    )?;
    std::fs::write(
        &public_path,
        public
            .to_armored_string(None)
            .map_err(MirrorError::from)?,
    )?;

    println!("> wrote secret key to {}", secret_path.display());
    println!("> wrote public key to {}", public_path.display());

    Ok(())
}

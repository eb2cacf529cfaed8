//! A command-line voter for an evoting cluster.
//! Every command talks to a single node; point `--server` at the primary for
//! anything that changes state.

use std::fs;

use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use data_encoding::HEXLOWER_PERMISSIVE;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rocket::tokio::runtime::Runtime;

use evoting_backend::client::{ClientError, VotingClient};
use evoting_backend::model::api::{
    election::ElectionSpec,
    status::{CastVoteCode, CreateElectionCode, GetResultCode, RegisterVoterCode, UnregisterVoterCode},
};

const PROGRAM_NAME: &str = "evoting-cli";

const ABOUT_TEXT: &str = "Register, vote and read results on an evoting cluster.

EXIT CODES:
     0: The server accepted the request.
     2: The server answered with a refusal code.
 Other: Error.";

const SERVER: &str = "SERVER";
const NAME: &str = "NAME";
const KEY: &str = "KEY";
const GROUP: &str = "GROUP";
const ELECTION: &str = "ELECTION";
const CHOICE: &str = "CHOICE";
const GROUPS: &str = "GROUPS";
const CHOICES: &str = "CHOICES";
const END: &str = "END";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let server = Arg::new(SERVER)
        .long("server")
        .help("Base URL of the node to talk to")
        .default_value("http://127.0.0.1:8000")
        .global(true);
    let name = Arg::new(NAME)
        .long("name")
        .help("Voter name")
        .required(true);
    let key = Arg::new(KEY)
        .long("key")
        .help("File holding the voter's hex-encoded private key")
        .required(true);

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .arg(server)
        .subcommand(
            Command::new("keygen")
                .about("Generate a voter keypair and print the public half")
                .arg(key.clone()),
        )
        .subcommand(
            Command::new("register")
                .about("Register a voter with the public half of its key")
                .arg(name.clone())
                .arg(key.clone())
                .arg(Arg::new(GROUP).required(true)),
        )
        .subcommand(
            Command::new("unregister")
                .about("Remove a voter")
                .arg(Arg::new(NAME).required(true)),
        )
        .subcommand(
            Command::new("create-election")
                .about("Create an election")
                .arg(name.clone())
                .arg(key.clone())
                .arg(Arg::new(ELECTION).required(true))
                .arg(
                    Arg::new(GROUPS)
                        .long("groups")
                        .help("Comma-separated voter groups allowed to vote")
                        .value_delimiter(',')
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new(CHOICES)
                        .long("choices")
                        .help("Comma-separated choices")
                        .value_delimiter(',')
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new(END)
                        .long("end")
                        .help("Closing time, RFC 3339")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("vote")
                .about("Cast a vote")
                .arg(name)
                .arg(key)
                .arg(Arg::new(ELECTION).required(true))
                .arg(Arg::new(CHOICE).required(true)),
        )
        .subcommand(
            Command::new("result")
                .about("Show the tally of a closed election")
                .arg(Arg::new(ELECTION).required(true)),
        )
}

/// Errors that this program may produce.
#[derive(Debug)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Malformed key file or argument.
    Input(String),
    /// The request failed.
    Client(ClientError),
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

fn read_key(path: &str) -> Result<SigningKey, Error> {
    let text = fs::read_to_string(path).map_err(|e| Error::IO(format!("{path}: {e}")))?;
    let bytes = HEXLOWER_PERMISSIVE
        .decode(text.trim().as_bytes())
        .map_err(|e| Error::Input(format!("{path}: {e}")))?;
    let secret: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Input(format!("{path}: expected 32 bytes")))?;
    Ok(SigningKey::from_bytes(&secret))
}

fn client_for(server: &str, args: &ArgMatches) -> Result<VotingClient, Error> {
    // Required arguments are guaranteed to be present.
    let name: &String = args.get_one(NAME).unwrap();
    let key: &String = args.get_one(KEY).unwrap();
    Ok(VotingClient::new(server, name.as_str(), read_key(key)?))
}

/// Print the server's answer and report whether it was a success.
fn report(outcome: impl std::fmt::Display, success: bool) -> bool {
    println!("{outcome}");
    success
}

async fn execute(args: &ArgMatches) -> Result<bool, Error> {
    let server: &String = args.get_one(SERVER).unwrap();
    let accepted = match args.subcommand() {
        Some(("keygen", sub)) => {
            let path: &String = sub.get_one(KEY).unwrap();
            let key = SigningKey::generate(&mut OsRng);
            fs::write(path, data_encoding::HEXLOWER.encode(&key.to_bytes()))
                .map_err(|e| Error::IO(format!("{path}: {e}")))?;
            println!("{}", data_encoding::HEXLOWER.encode(key.verifying_key().as_bytes()));
            true
        }
        Some(("register", sub)) => {
            let group: &String = sub.get_one(GROUP).unwrap();
            let code = client_for(server, sub)?.register(group).await?;
            report(code, code == RegisterVoterCode::Success)
        }
        Some(("unregister", sub)) => {
            let name: &String = sub.get_one(NAME).unwrap();
            let client = VotingClient::new(server.as_str(), name.as_str(), SigningKey::generate(&mut OsRng));
            let code = client.unregister(name).await?;
            report(code, code == UnregisterVoterCode::Success)
        }
        Some(("create-election", sub)) => {
            let end: &String = sub.get_one(END).unwrap();
            let end_date = DateTime::parse_from_rfc3339(end)
                .map_err(|e| Error::Input(format!("{end}: {e}")))?
                .with_timezone(&Utc);
            let spec = ElectionSpec {
                name: sub.get_one::<String>(ELECTION).unwrap().clone(),
                groups: sub.get_many::<String>(GROUPS).unwrap().cloned().collect(),
                choices: sub.get_many::<String>(CHOICES).unwrap().cloned().collect(),
                end_date,
            };
            let code = client_for(server, sub)?.create_election(&spec).await?;
            report(code, code == CreateElectionCode::Success)
        }
        Some(("vote", sub)) => {
            let election: &String = sub.get_one(ELECTION).unwrap();
            let choice: &String = sub.get_one(CHOICE).unwrap();
            let code = client_for(server, sub)?.cast_vote(election, choice).await?;
            report(code, code == CastVoteCode::Success)
        }
        Some(("result", sub)) => {
            let election: &String = sub.get_one(ELECTION).unwrap();
            // Reading results needs no identity.
            let client = VotingClient::new(server.as_str(), "", SigningKey::generate(&mut OsRng));
            let result = client.result(election).await?;
            println!("{}", result.status);
            for count in &result.counts {
                println!("{:>8}  {}", count.count, count.choice_name);
            }
            result.status == GetResultCode::Success
        }
        _ => unreachable!("subcommand is required"),
    };
    Ok(accepted)
}

/// Run the command, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("IO error: {e}");
            return 1;
        }
    };
    match runtime.block_on(execute(args)) {
        Ok(true) => 0,
        Ok(false) => 2,
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Input(msg)) => {
            println!("Invalid input: {msg}");
            1
        }
        Err(Error::Client(e)) => {
            println!("Request failed: {e}");
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keygen_writes_usable_key() {
        let random: u32 = rand::random();
        let path = std::env::temp_dir().join(format!("evoting-cli-key-{random}"));
        let path = path.to_str().unwrap();

        let args = cli().try_get_matches_from([PROGRAM_NAME, "keygen", "--key", path]).unwrap();
        assert_eq!(run(&args), 0);
        assert!(read_key(path).is_ok());

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn correct_cli_usage() {
        let command_line = [
            PROGRAM_NAME,
            "--server",
            "http://10.0.0.1:8000",
            "create-election",
            "--name",
            "alice",
            "--key",
            "alice.key",
            "e1",
            "--groups",
            "eng,ops",
            "--choices",
            "yes,no",
            "--end",
            "2030-01-01T00:00:00Z",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        let (_, sub) = args.subcommand().unwrap();
        let groups: Vec<&String> = sub.get_many(GROUPS).unwrap().collect();
        assert_eq!(groups, ["eng", "ops"]);

        // Unreadable key file.
        assert_eq!(run(&args), 1);
    }

    #[test]
    fn bad_cli_usage() {
        // No subcommand.
        cli().try_get_matches_from([PROGRAM_NAME]).unwrap_err();

        // Missing key.
        cli()
            .try_get_matches_from([PROGRAM_NAME, "vote", "--name", "alice", "e1", "yes"])
            .unwrap_err();
    }
}

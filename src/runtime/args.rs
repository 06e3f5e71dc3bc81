use std::path::PathBuf;

pub const USAGE: &str = "\
usage: contract_sync [--range <start>-<end> | --file <path>]

  (no arguments)          resume from the newest stored deployment up to the chain head
  --range <start>-<end>   scan an explicit inclusive block range
  --file <path>           resolve the addresses listed in <path>, one per line

Configuration is read from the environment and an optional .env file.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    ResumeFromLast,
    Range { start: u64, end: u64 },
    AddressFile(PathBuf),
    Help,
}

fn parse_block_range(raw: &str) -> anyhow::Result<(u64, u64)> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("invalid range '{}': expected <start>-<end>", raw))?;
    let start = start
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow::anyhow!("invalid range start '{}': {}", start.trim(), err))?;
    let end = end
        .trim()
        .parse::<u64>()
        .map_err(|err| anyhow::anyhow!("invalid range end '{}': {}", end.trim(), err))?;
    if start > end {
        return Err(anyhow::anyhow!(
            "invalid range '{}': start must not exceed end",
            raw
        ));
    }
    Ok((start, end))
}

fn parse_runtime_args_from_iter<I, S>(args: I) -> anyhow::Result<RunMode>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let supplied_args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_string())
        .collect::<Vec<_>>();

    match supplied_args.as_slice() {
        [] => Ok(RunMode::ResumeFromLast),
        [flag] if flag == "--help" || flag == "-h" => Ok(RunMode::Help),
        [flag, value] if flag == "--range" => {
            let (start, end) = parse_block_range(value)?;
            Ok(RunMode::Range { start, end })
        }
        [flag, value] if flag == "--file" => {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("--file requires a path"));
            }
            Ok(RunMode::AddressFile(PathBuf::from(value)))
        }
        other => Err(anyhow::anyhow!(
            "unrecognized arguments: {}\n\n{}",
            other.join(" "),
            USAGE
        )),
    }
}

pub fn parse_runtime_args() -> anyhow::Result<RunMode> {
    parse_runtime_args_from_iter(std::env::args().skip(1))
}

//! Line-oriented front-end for pipes and limited terminals.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::local::{LocalShell, Outcome, Tone};

pub async fn run(mut shell: LocalShell) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}", shell.prompt());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };

        let outcome = shell.handle(&line).await;
        if matches!(outcome, Outcome::Exit) {
            return Ok(());
        }
        for (tone, text) in outcome.display_lines() {
            match tone {
                Tone::Error => eprintln!("{text}"),
                Tone::Normal | Tone::Notice => println!("{text}"),
            }
        }
    }
}

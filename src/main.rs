use clap::Parser;
use org_backup::{org_backup_main, OrgBackupCli};
use std::process::exit;

#[tokio::main]
async fn main() {
    let args = OrgBackupCli::parse();
    if !args.quiet {
        println!(concat!(
            env!("CARGO_PKG_NAME"),
            " ",
            env!("CARGO_PKG_VERSION")
        ));
    }
    match org_backup_main(args).await {
        Ok(status) => {
            exit(status.exit_code());
        }
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };
}

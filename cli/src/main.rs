//! Binary entrypoint for gfcat (made by FontLab https://www.fontlab.com/)

fn main() {
    match gfcat_cli::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

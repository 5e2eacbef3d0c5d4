use std::io;

fn main() -> io::Result<()> {
    effc_lsp::run_stdio_loop()
}

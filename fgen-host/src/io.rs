use std::io::{stdin, stdout, Result, Write};

#[macro_export]
macro_rules! pause {
    () => {
        $crate::io::pause_impl(None)
    };
    ($($arg:tt)*) => {
        $crate::io::pause_impl(Some(&format!($($arg)*)))
    };
}

/// Prints `message` and blocks until a key is pressed
pub fn pause_impl(message: Option<&str>) -> Result<()> {
    use termion::input::TermRead;
    use termion::raw::IntoRawMode;

    println!("{}", message.unwrap_or("Press any key to continue..."));

    let mut stdout = stdout().into_raw_mode()?;
    stdout.flush()?;
    stdin().events().next().transpose()?;

    Ok(())
}

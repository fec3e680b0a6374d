use std::io::Write;

/// 初始化全局 logger
///
/// 默认 `info` 级别，可以通过 `RUST_LOG` 覆盖。
/// 每行带上线程名，方便区分 `Asset-Loader-{i}` 和 `AssetDispatchThread` 的输出。
pub fn init_log() {
    let _ = builder().try_init();
}

fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let thread_style = info_style.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Cyan)));
            let black_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let current = std::thread::current();
            let thread_name = current.name().unwrap_or("<unnamed>");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {thread_style}({thread_name}){thread_style:#} \
                 {grey_style}[{file}:{line}]{grey_style:#} {black_style}{}{black_style:#}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_env("RUST_LOG");
    builder
}

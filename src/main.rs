fn main() -> std::process::ExitCode {
    youtube_mp4_lib::run()
}

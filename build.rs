use std::process::Command;

fn main() {
    // 构建时间
    let build_time = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    let git_hash = run(&["git", "rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash);

    let rust_version = run(&["rustc", "--version"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=RUST_VERSION={}", rust_version);

    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// 执行命令并返回去掉首尾空白的标准输出
fn run(cmd: &[&str]) -> Option<String> {
    let (program, args) = cmd.split_first()?;
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

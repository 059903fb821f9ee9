// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::shell::{sh_escape, sh_join};
use crate::app::types::SimpleDuration;

pub const STDOUT_FILE: &str = "stdout.txt";
pub const STDERR_FILE: &str = "stderr.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbatchSpec<'a> {
    pub job_name: &'a str,
    pub nodes: u32,
    pub tasks_per_node: u32,
    pub max_time: SimpleDuration,
    /// Directory holding `stdout.txt`/`stderr.txt`.
    pub log_dir: &'a str,
    /// Working directory of the payload (the staged `work/` dir).
    pub work_dir: &'a str,
    pub partition: Option<&'a str>,
    pub account: Option<&'a str>,
    pub container: Option<&'a str>,
    pub command: &'a [String],
}

pub fn render_sbatch_script(spec: &SbatchSpec<'_>) -> String {
    let mut lines = vec![
        "#!/usr/bin/env bash".to_string(),
        format!("#SBATCH --job-name={}", sh_escape(spec.job_name)),
        format!("#SBATCH --nodes={}", spec.nodes),
        format!("#SBATCH --ntasks-per-node={}", spec.tasks_per_node),
        format!("#SBATCH --time={}", spec.max_time),
        format!("#SBATCH --output={}/{STDOUT_FILE}", spec.log_dir),
        format!("#SBATCH --error={}/{STDERR_FILE}", spec.log_dir),
        format!("#SBATCH --chdir={}", spec.work_dir),
    ];
    if let Some(partition) = spec.partition {
        lines.push(format!("#SBATCH --partition={partition}"));
    }
    if let Some(account) = spec.account {
        lines.push(format!("#SBATCH --account={account}"));
    }
    lines.push(String::new());
    lines.push("set -euo pipefail".to_string());
    let command = sh_join(spec.command);
    match spec.container {
        Some(image) => lines.push(format!(
            "srun apptainer exec --bind {work}:{work} {} {command}",
            sh_escape(image),
            work = sh_escape(spec.work_dir),
        )),
        None => lines.push(format!("srun {command}")),
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(command: &'a [String]) -> SbatchSpec<'a> {
        SbatchSpec {
            job_name: "figlet-j1",
            nodes: 2,
            tasks_per_node: 4,
            max_time: SimpleDuration::new(1, 30, 0),
            log_dir: "/ws/j1",
            work_dir: "/ws/j1/work",
            partition: None,
            account: None,
            container: None,
            command,
        }
    }

    #[test]
    fn renders_resource_directives() {
        let command = vec!["figlet".to_string(), "hi there".to_string()];
        let script = render_sbatch_script(&spec(&command));
        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("#SBATCH --nodes=2\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=4\n"));
        assert!(script.contains("#SBATCH --time=01:30:00\n"));
        assert!(script.contains("#SBATCH --output=/ws/j1/stdout.txt\n"));
        assert!(script.contains("#SBATCH --chdir=/ws/j1/work\n"));
        assert!(script.contains("srun 'figlet' 'hi there'"));
        assert!(!script.contains("--partition"));
    }

    #[test]
    fn renders_optional_directives_and_container() {
        let command = vec!["solver".to_string()];
        let mut s = spec(&command);
        s.partition = Some("gpu");
        s.account = Some("proj1");
        s.container = Some("docker://solver:1.0");
        let script = render_sbatch_script(&s);
        assert!(script.contains("#SBATCH --partition=gpu\n"));
        assert!(script.contains("#SBATCH --account=proj1\n"));
        assert!(script.contains("apptainer exec --bind '/ws/j1/work':'/ws/j1/work' 'docker://solver:1.0' 'solver'"));
    }
}

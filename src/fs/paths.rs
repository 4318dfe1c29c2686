use std::path::PathBuf;

use super::Fs;

/// Utility fns for making the paths of the work directory layout.
impl Fs {
    /// $WORK/logs
    pub fn logs_dir(&self) -> PathBuf {
        self.work_prefix.join("logs")
    }

    /// $WORK/jobs/unit.sh
    pub fn job_script(&self, unit: &str) -> PathBuf {
        self.parts2("jobs", format!("{unit}.sh"))
    }

    /// $WORK/jobs/unit.sh.started
    pub fn job_started(&self, unit: &str) -> PathBuf {
        self.parts2("jobs", format!("{unit}.sh.started"))
    }

    /// $WORK/jobs/unit.sh.finished
    pub fn job_finished(&self, unit: &str) -> PathBuf {
        self.parts2("jobs", format!("{unit}.sh.finished"))
    }

    /// $WORK/logs/unit.out, where the scheduler writes job stdout
    pub fn job_stdout(&self, unit: &str) -> PathBuf {
        self.parts2("logs", format!("{unit}.out"))
    }

    /// $WORK/logs/unit.err, where the scheduler writes job stderr
    pub fn job_stderr(&self, unit: &str) -> PathBuf {
        self.parts2("logs", format!("{unit}.err"))
    }

    /// $WORK/tmp/unit
    pub fn unit_tmp_dir(&self, unit: &str) -> PathBuf {
        self.parts2("tmp", unit)
    }

    /// $WORK/results/unit
    pub fn unit_results_dir(&self, unit: &str) -> PathBuf {
        self.parts2("results", unit)
    }

    fn parts2<T, U>(&self, p1: T, p2: U) -> PathBuf
    where
        T: AsRef<std::path::Path>,
        U: AsRef<std::path::Path>,
    {
        let mut buf = self.work_prefix.clone();
        buf.push(p1);
        buf.push(p2);
        buf
    }
}

use super::*;

pub(crate) struct CommandBuilder {
    args: Vec<String>,
    env: Vec<(String, String)>,
    tempdir: Arc<TempDir>,
}

impl CommandBuilder {
    pub(crate) fn new(args: impl ToArgs) -> Self {
        Self {
            args: args.to_args(),
            env: Vec::new(),
            tempdir: Arc::new(TempDir::new().unwrap()),
        }
    }

    pub(crate) fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub(crate) fn tempdir(self, tempdir: Arc<TempDir>) -> Self {
        Self { tempdir, ..self }
    }

    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(executable_path("livelogs"));

        command
            .env("LIVELOGS_INTEGRATION_TEST", "1")
            .env_remove("RUST_LOG")
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&*self.tempdir)
            .args(&self.args);

        command
    }

    #[track_caller]
    pub(crate) fn spawn(self) -> Child {
        self.command().spawn().unwrap()
    }

    #[track_caller]
    pub(crate) fn output(self) -> Output {
        self.command().output().unwrap()
    }
}

/// A financial command run by a [`CommandExecutor`].
///
/// The executor calls `pre`, then `execute`, then `on_success`. If `pre` or
/// `execute` fails, `on_failure` runs instead of `on_success`. `release` is
/// always called last.
pub trait Command<'a, C: ?Sized> {
    type Error;

    /// Checks and resource acquisition. `context` holds whatever the
    /// executor shares between commands, e.g. the lock service.
    fn pre(&mut self, context: &'a C) -> Result<(), Self::Error>;

    fn execute(&mut self) -> Result<(), Self::Error>;

    fn on_success(&mut self);

    /// Compensation for a failed `pre` or `execute`. Returning `Ok` lets the
    /// original error propagate, an `Err` replaces it.
    fn on_failure(&mut self, error: &Self::Error) -> Result<(), Self::Error>;

    /// Releases whatever `pre` acquired. An error here replaces any other.
    fn release(&mut self) -> Result<(), Self::Error>;
}

pub struct CommandExecutor<C> {
    context: C,
}

impl<C> CommandExecutor<C> {
    pub fn new(context: C) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Runs the full lifecycle of `command` and returns the error that wins,
    /// in order of precedence: `release`, `on_failure`, then `pre`/`execute`.
    pub fn execute<'a, K>(&'a self, command: &mut K) -> Result<(), K::Error>
    where
        K: Command<'a, C>,
    {
        let outcome = match command
            .pre(&self.context)
            .and_then(|()| command.execute())
        {
            Ok(()) => {
                command.on_success();
                Ok(())
            }
            Err(err) => match command.on_failure(&err) {
                Ok(()) => Err(err),
                Err(failure) => Err(failure),
            },
        };

        match command.release() {
            Ok(()) => outcome,
            Err(err) => Err(err),
        }
    }
}

//! Timer-driven round robin across terminals, and Alt+Fn terminal switching.
//! Both end in the same save/swap/restore step, [`Kernel::switch_to`].

pub mod context;

use crate::config::LoneProcess;
use crate::drivers::tty::TerminalId;
use crate::fs::Storage;
use crate::kernel::{Hardware, Kernel};
use crate::process::{Launch, ProcessId};

/// Mappings already point at `to`; the caller parks `from` in its switch
/// context and continues `to` from its own. `from` is `None` when nothing was
/// running, and there is nothing to park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: Option<ProcessId>,
    pub to: ProcessId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalSwitch {
    /// The requested terminal was already on screen.
    Unchanged,
    /// The screen changed but the running process keeps the CPU.
    Shown,
    /// First visit: a shell was loaded there. `preempted` is parked in its
    /// switch context while the shell enters ring 3.
    Launched { launch: Launch, preempted: Option<ProcessId> },
    Switched(Switch),
}

impl<S: Storage, H: Hardware> Kernel<S, H> {
    pub fn switch_to(&mut self, from: Option<ProcessId>, to: ProcessId) -> Switch {
        self.install(to);
        crate::log_debug!("sched: pid {:?} -> pid {}", from, to);
        Switch { from, to }
    }

    /// Called on every PIT tick. Moves to the foreground process of the next
    /// terminal that has one. With nothing running, the first such process
    /// is picked up.
    pub fn schedule_next(&mut self) -> Option<Switch> {
        if !self.config.preemption {
            return None;
        }
        let Some(from) = self.running else {
            let to = TerminalId::all().find_map(|id| self.terminals.get(id).foreground)?;
            return Some(self.switch_to(None, to));
        };
        let current = self.pcbs.get(from).terminal;
        let next = self
            .terminals
            .next_live_after(current)
            .and_then(|id| self.terminals.get(id).foreground);
        match next {
            Some(to) if to != from => Some(self.switch_to(Some(from), to)),
            _ => {
                if self.config.lone_process == LoneProcess::Reload {
                    self.install(from);
                }
                None
            }
        }
    }

    pub fn switch_terminal(&mut self, target: TerminalId) -> TerminalSwitch {
        if !self.terminals.show(&mut self.hw, target) {
            return TerminalSwitch::Unchanged;
        }
        // a background program's video page must follow its terminal off screen
        if let Some(pid) = self.running {
            self.sync_video(pid);
            self.paging.commit(&mut self.hw);
        }
        crate::log_info!("tty: switched to {}", target);

        if !self.terminals.get(target).launched {
            self.terminals.get_mut(target).launched = true;
            let preempted = self.running;
            let shell = self.config.shell;
            return match self.exec(target, shell) {
                Ok(launch) => TerminalSwitch::Launched { launch, preempted },
                Err(err) => {
                    self.terminals.get_mut(target).launched = false;
                    crate::log_error!("tty: no shell on {}: {}", target, err);
                    TerminalSwitch::Shown
                }
            };
        }

        match (self.running, self.terminals.get(target).foreground) {
            (from, Some(to)) if from != Some(to) => TerminalSwitch::Switched(self.switch_to(from, to)),
            _ => TerminalSwitch::Shown,
        }
    }
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub use hw::{complete_terminal_switch, preempt};

#[cfg(all(target_arch = "x86_64", not(test)))]
mod hw {
    use super::context::{resume, switch_context, SavedContext};
    use super::{Switch, TerminalSwitch};
    use crate::kernel::with_kernel;

    /// Parks `from` and continues `to`. Without a `from` the current stack
    /// belongs to nobody and is abandoned.
    fn perform(switch: Switch) {
        let (old, new) = with_kernel(|k| {
            let old = switch.from.map(|from| k.pcbs.switch_context_ptr(from));
            (old, k.pcbs.switch_context_ptr(switch.to) as *const SavedContext)
        });
        match old {
            Some(old) => unsafe { switch_context(old, new) },
            None => unsafe { resume(new, 0) },
        }
    }

    /// Timer path. The interrupt has already been acknowledged; the switch
    /// returns here once the preempted process is rescheduled.
    pub fn preempt() {
        if let Some(switch) = with_kernel(|k| k.schedule_next()) {
            perform(switch);
        }
    }

    /// Finishes what [`Kernel::switch_terminal`](crate::kernel::Kernel) decided,
    /// after the lock is released.
    pub fn complete_terminal_switch(outcome: TerminalSwitch) {
        match outcome {
            TerminalSwitch::Unchanged | TerminalSwitch::Shown => {}
            TerminalSwitch::Switched(switch) => perform(switch),
            TerminalSwitch::Launched { launch, preempted } => {
                let slot = with_kernel(|k| match preempted {
                    Some(pid) => k.pcbs.switch_context_ptr(pid),
                    None => k.pcbs.exec_context_ptr(launch.pid),
                });
                unsafe { crate::interrupts::usermode::launch(slot, launch) };
            }
        }
    }
}

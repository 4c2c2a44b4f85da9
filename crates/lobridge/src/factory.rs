use lobridge_core::ProcessManagerFactory;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = lobridge_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = lobridge_windows::WindowsProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return lobridge_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return lobridge_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return lobridge_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return lobridge_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Process manager of the current platform
pub type PlatformProcessManager = <PlatformProcessManagerFactory as ProcessManagerFactory>::Manager;
